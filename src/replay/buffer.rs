use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;

use super::ReplaySettings;
use super::ledger::SharedLedger;
use super::segment::{Segment, SegmentFile};
use crate::config::CaptureSettings;
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::event_bus::EventBus;
use crate::core::events::{Event, EventBuilder};
use crate::core::lock::{lock_rwlock_read, lock_rwlock_write};
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::timestamp::unix_ms_now;
use crate::display::{self, DisplayProvider};
use crate::process::encoder::{CaptureJobSpec, OutputFormat};
use crate::process::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl BufferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferState::Stopped => "stopped",
            BufferState::Starting => "starting",
            BufferState::Running => "running",
            BufferState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for BufferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub jobs_started: u64,
    pub jobs_failed: u64,
    pub segments_captured: u64,
    pub consecutive_failures: u32,
}

#[derive(Default)]
struct Counters {
    jobs_started: AtomicU64,
    jobs_failed: AtomicU64,
    segments_captured: AtomicU64,
    consecutive_failures: AtomicU32,
}

struct Inner {
    name: String,
    settings: ReplaySettings,
    capture: RwLock<CaptureSettings>,
    supervisor: Arc<Supervisor>,
    displays: Arc<dyn DisplayProvider>,
    ledger: SharedLedger,
    state_tx: watch::Sender<BufferState>,
    counters: Counters,
    events: Option<Arc<EventBus>>,
    event_builder: EventBuilder,
    scrubbed: AtomicBool,
    seq: AtomicU64,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The rolling capture loop: chains bounded encoder jobs end to end and keeps
/// their output in a time-windowed ledger.
///
/// One job runs at a time. A failed job never stops the loop; consecutive
/// failures stretch the pause between jobs up to `max_backoff`. Only
/// [`ReplayBuffer::stop`] ends it.
pub struct ReplayBuffer {
    inner: Arc<Inner>,
    worker: AsyncMutex<Option<Worker>>,
}

impl ReplayBuffer {
    pub fn new(
        name: &str,
        settings: ReplaySettings,
        capture: CaptureSettings,
        supervisor: Arc<Supervisor>,
        displays: Arc<dyn DisplayProvider>,
    ) -> Self {
        let ledger = SharedLedger::new(settings.retention_policy());
        let (state_tx, _) = watch::channel(BufferState::Stopped);

        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                settings,
                capture: RwLock::new(capture),
                supervisor,
                displays,
                ledger,
                state_tx,
                counters: Counters::default(),
                events: None,
                event_builder: EventBuilder::new("replay", name),
                scrubbed: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            worker: AsyncMutex::new(None),
        }
    }

    /// Attaches an event bus. Must be called before the buffer is shared.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(bus);
        }
        self
    }

    pub fn state(&self) -> BufferState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BufferState> {
        self.inner.state_tx.subscribe()
    }

    pub fn ledger(&self) -> SharedLedger {
        self.inner.ledger.clone()
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.inner.settings
    }

    pub fn stats(&self) -> BufferStats {
        let c = &self.inner.counters;
        BufferStats {
            jobs_started: c.jobs_started.load(Ordering::Relaxed),
            jobs_failed: c.jobs_failed.load(Ordering::Relaxed),
            segments_captured: c.segments_captured.load(Ordering::Relaxed),
            consecutive_failures: c.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// Capture settings used from the next job on.
    pub fn set_capture_settings(&self, capture: CaptureSettings) {
        *lock_rwlock_write(&self.inner.capture, "ReplayBuffer::set_capture_settings") = capture;
    }

    pub async fn start(&self) -> CaptureResult<()> {
        let mut worker = self.worker.lock().await;
        let state = self.state();
        if state != BufferState::Stopped || worker.is_some() {
            return Err(CaptureError::invalid_state("replay buffer", state, "start"));
        }

        self.inner.set_state(BufferState::Starting);
        let stale = self.inner.ledger.clear();
        if stale > 0 {
            self.inner.debug(&format!("dropped {} stale segments", stale));
        }

        if let Err(e) = self.inner.prepare_scratch().await {
            self.inner.error(&e.to_string());
            self.inner.set_state(BufferState::Stopped);
            return Err(e);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.inner.set_state(BufferState::Running);
        let task = tokio::spawn(run_loop(self.inner.clone(), shutdown_rx));
        *worker = Some(Worker { shutdown, task });

        self.inner.info(&format!(
            "replay buffer running (window {}s, segments {}s) in {}",
            self.inner.settings.window.as_secs(),
            self.inner.settings.segment_duration.as_secs(),
            self.inner.settings.scratch_dir.display()
        ));
        Ok(())
    }

    /// Stops the loop, waits for the in-flight job, clears the ledger and
    /// purges the scratch directory.
    /// Stopping a stopped buffer is a no-op.
    pub async fn stop(&self) -> CaptureResult<()> {
        let mut worker = self.worker.lock().await;
        let Some(current) = worker.take() else {
            return Ok(());
        };

        self.inner.set_state(BufferState::Stopping);
        let _ = current.shutdown.send(true);
        if let Err(e) = current.task.await {
            self.inner.error(&format!("capture loop ended abnormally: {}", e));
        }

        let cleared = self.inner.ledger.clear();
        self.inner.purge_scratch().await;
        self.inner.set_state(BufferState::Stopped);
        self.inner.info(&format!("replay buffer stopped, {} segments discarded", cleared));
        Ok(())
    }
}

impl Drop for ReplayBuffer {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.try_lock() {
            if let Some(current) = worker.take() {
                let _ = current.shutdown.send(true);
            }
        }
    }
}

impl Inner {
    fn set_state(&self, state: BufferState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            self.debug(&format!("{} -> {}", previous, state));
            self.emit(self.event_builder.buffer_state(state.as_str()));
        }
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    async fn prepare_scratch(&self) -> CaptureResult<()> {
        let dir = &self.settings.scratch_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CaptureError::io(format!("creating {}", dir.display()), e))?;

        // leftovers of a previous process; later restarts own everything here
        if !self.scrubbed.swap(true, Ordering::SeqCst) {
            let removed = scrub_orphans(dir).await;
            if removed > 0 {
                self.info(&format!("removed {} orphaned files from scratch", removed));
            }
        }
        Ok(())
    }

    /// Removes every leftover artifact from scratch unless a save still
    /// reads from it; those saves delete their own files when they finish.
    async fn purge_scratch(&self) {
        let pinned = self.ledger.pinned();
        if pinned > 0 {
            self.debug(&format!("{} saves in flight, leaving scratch to them", pinned));
            return;
        }
        let removed = scrub_orphans(&self.settings.scratch_dir).await;
        if removed > 0 {
            self.info(&format!("removed {} leftover files from scratch", removed));
        }
    }

    fn build_job(&self, output_path: PathBuf) -> CaptureJobSpec {
        let capture = lock_rwlock_read(&self.capture, "ReplayBuffer::build_job").clone();
        let geometry = display::resolve(self.displays.as_ref(), &capture.screen_id);
        if geometry.is_none() && !capture.screen_id.trim().is_empty() {
            self.warn(&format!(
                "display '{}' not found, capturing the whole desktop",
                capture.screen_id
            ));
        }

        CaptureJobSpec {
            geometry,
            frame_rate: capture.frame_rate,
            bit_rate_kbps: capture.bit_rate_kbps.min(self.settings.max_bit_rate_kbps),
            duration_cap: Some(self.settings.segment_duration),
            format: OutputFormat::Mkv,
            output_path,
        }
    }

    fn next_segment_path(&self) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.settings
            .scratch_dir
            .join(format!("segment_{}_{:06}.mkv", unix_ms_now(), seq))
    }

    fn record_success(&self, segment: Segment) {
        let path = segment.path().to_path_buf();
        if self.ledger.insert(segment) {
            self.counters.segments_captured.fetch_add(1, Ordering::Relaxed);
            self.debug(&format!(
                "segment {} added ({} retained)",
                path.display(),
                self.ledger.len()
            ));
        }
        self.counters.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, path: &Path, err: &CaptureError) -> u32 {
        self.counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
        let failures = self.counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        self.warn(&format!("job failed ({} in a row): {}", failures, err));
        if err.is_spawn_failure() {
            self.emit(self.event_builder.error(err.kind(), &err.to_string()));
        } else {
            self.emit(self.event_builder.segment_rejected(path, &err.to_string()));
        }
        failures
    }
}

impl ComponentLogger for Inner {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayBuffer", &self.name)
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let grace = inner.supervisor.encoder().grace();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let path = inner.next_segment_path();
        let job = inner.build_job(path.clone());
        let created_at = Instant::now();
        inner.counters.jobs_started.fetch_add(1, Ordering::Relaxed);

        let outcome = match inner.supervisor.start(job) {
            Ok(handle) => {
                let exit = tokio::select! {
                    exit = handle.wait() => Some(exit),
                    _ = shutdown.changed() => None,
                };

                match exit {
                    Some(exit) => Segment::accept(
                        path.clone(),
                        created_at,
                        inner.settings.segment_duration,
                        &exit,
                    ),
                    None => {
                        let exit = handle.request_stop(grace).await;
                        inner.debug(&format!("in-flight job stopped ({}), discarding", exit));
                        drop(SegmentFile::new(&path));
                        break;
                    }
                }
            }
            Err(e) => Err(e),
        };

        let failures = match outcome {
            Ok(segment) => {
                inner.record_success(segment);
                0
            }
            Err(e) => inner.record_failure(&path, &e),
        };

        let evicted = inner.ledger.evict_expired(Instant::now());
        if evicted > 0 {
            inner.debug(&format!("evicted {} expired segments", evicted));
        }

        let delay = inner.settings.backoff(failures);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    inner.debug("capture loop finished");
}

/// Removes files this component names (`segment_*`, `concat_*`).
async fn scrub_orphans(dir: &Path) -> usize {
    let mut removed = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("segment_") || name.starts_with("concat_")) {
            continue;
        }
        if tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}
