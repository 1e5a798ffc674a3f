use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::config::{CapturePatch, CaptureSettings, Config};
use crate::core::error::CaptureResult;
use crate::core::event_bus::EventBus;
use crate::core::events::EventBuilder;
use crate::core::lock::{lock_rwlock_read, lock_rwlock_write};
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::timestamp::file_stamp_now;
use crate::display::{DisplayInfo, DisplayProvider, StaticDisplays};
use crate::health::{HealthReport, check_encoder};
use crate::process::supervisor::Supervisor;
use crate::recorder::{Recorder, Recording, take_screenshot};
use crate::replay::{BufferState, Compositor, ReplayBuffer, ReplayClip, ReplaySettings};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub is_recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<PathBuf>,
    pub is_replay_buffering: bool,
    pub replay_state: BufferState,
    pub window_secs: u64,
    pub segments: usize,
    pub buffered_secs: u64,
    pub jobs_started: u64,
    pub jobs_failed: u64,
    pub segments_captured: u64,
    pub consecutive_failures: u32,
}

/// Everything the outer surfaces (HTTP API, signal handling) drive: the
/// continuous recorder, the replay buffer and its compositor.
pub struct CaptureService {
    capture: RwLock<CaptureSettings>,
    displays: Arc<StaticDisplays>,
    supervisor: Arc<Supervisor>,
    recorder: Recorder,
    replay: ReplayBuffer,
    compositor: Compositor,
    events: Arc<EventBus>,
    event_builder: EventBuilder,
}

impl CaptureService {
    pub fn new(config: &Config, events: Arc<EventBus>) -> Self {
        let supervisor = Arc::new(Supervisor::new(config.encoder.clone()));
        let displays = Arc::new(StaticDisplays::new(config.displays.clone()));
        let settings = ReplaySettings::from_config(&config.replay, config.scratch_dir());

        let recorder = Recorder::new(supervisor.clone(), displays.clone()).with_events(events.clone());
        let compositor = Compositor::new(supervisor.clone(), settings.scratch_dir.clone());
        let replay = ReplayBuffer::new(
            "main",
            settings,
            config.capture.clone(),
            supervisor.clone(),
            displays.clone(),
        )
        .with_events(events.clone());

        Self {
            capture: RwLock::new(config.capture.clone()),
            displays,
            supervisor,
            recorder,
            replay,
            compositor,
            events,
            event_builder: EventBuilder::new("service", "main"),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        lock_rwlock_read(&self.capture, "CaptureService::capture_settings").clone()
    }

    pub fn update_capture(&self, patch: &CapturePatch) -> anyhow::Result<CaptureSettings> {
        let mut capture = lock_rwlock_write(&self.capture, "CaptureService::update_capture");
        capture.apply_patch(patch)?;
        self.replay.set_capture_settings(capture.clone());
        self.info("capture settings updated");
        Ok(capture.clone())
    }

    pub fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.displays()
    }

    pub async fn start_replay(&self) -> CaptureResult<()> {
        self.replay.start().await
    }

    pub async fn stop_replay(&self) -> CaptureResult<()> {
        self.replay.stop().await
    }

    /// Saves the last `window` (default: the configured replay window) to
    /// `<save_dir>/replay_<stamp>.mkv`.
    pub async fn save_replay(&self, window: Option<Duration>) -> CaptureResult<ReplayClip> {
        let window = window.unwrap_or(self.replay.settings().window);
        let output = self
            .capture_settings()
            .save_dir
            .join(format!("replay_{}.mkv", file_stamp_now()));

        let result = self
            .compositor
            .compose_window(&self.replay.ledger(), window, &output)
            .await;

        match &result {
            Ok(clip) => self.events.emit(self.event_builder.replay_saved(
                &clip.path,
                clip.segments,
                clip.nominal_duration.as_secs_f64(),
            )),
            Err(e) => {
                self.warn(&format!("replay save failed: {}", e));
                self.events
                    .emit(self.event_builder.replay_save_failed(e.kind(), &e.to_string()));
            }
        }
        result
    }

    pub async fn start_recording(&self) -> CaptureResult<PathBuf> {
        let capture = self.capture_settings();
        self.recorder.start(&capture).await
    }

    pub async fn stop_recording(&self) -> CaptureResult<Recording> {
        self.recorder.stop().await
    }

    pub async fn screenshot(&self) -> CaptureResult<PathBuf> {
        let capture = self.capture_settings();
        take_screenshot(&self.supervisor, self.displays.as_ref(), &capture).await
    }

    pub async fn health(&self) -> HealthReport {
        check_encoder(self.supervisor.encoder()).await
    }

    pub fn status(&self) -> ServiceStatus {
        let ledger = self.replay.ledger();
        let stats = self.replay.stats();
        let state = self.replay.state();

        ServiceStatus {
            is_recording: self.recorder.is_recording(),
            recording_path: self.recorder.current_path(),
            is_replay_buffering: state == BufferState::Running,
            replay_state: state,
            window_secs: self.replay.settings().window.as_secs(),
            segments: ledger.len(),
            buffered_secs: ledger.buffered().as_secs(),
            jobs_started: stats.jobs_started,
            jobs_failed: stats.jobs_failed,
            segments_captured: stats.segments_captured,
            consecutive_failures: stats.consecutive_failures,
        }
    }

    /// Stops whatever is running. Errors are logged, not returned.
    pub async fn shutdown(&self) {
        if self.recorder.is_recording() {
            match self.recorder.stop().await {
                Ok(recording) => {
                    self.info(&format!("recording saved to {}", recording.path.display()))
                }
                Err(e) => self.warn(&format!("stopping recording failed: {}", e)),
            }
        }
        if let Err(e) = self.replay.stop().await {
            self.warn(&format!("stopping replay buffer failed: {}", e));
        }
        self.info("capture service shut down");
    }
}

impl ComponentLogger for CaptureService {
    fn log_context(&self) -> LogContext {
        LogContext::new("CaptureService", "main")
    }
}
