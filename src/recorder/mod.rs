// src/recorder/mod.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CaptureSettings;
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::event_bus::EventBus;
use crate::core::events::EventBuilder;
use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::timestamp::file_stamp_now;
use crate::display::{self, DisplayProvider};
use crate::process::encoder::CaptureJobSpec;
use crate::process::supervisor::{ProcessExit, ProcessHandle, Supervisor};

pub mod screenshot;

pub use screenshot::take_screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Recording,
}

/// A finished continuous recording.
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub path: PathBuf,
    pub exit: ProcessExit,
    pub elapsed: Duration,
    pub bytes: u64,
}

struct ActiveRecording {
    handle: ProcessHandle,
    path: PathBuf,
    started: Instant,
}

/// Plain continuous recording: one open-ended encoder job at a time,
/// finalized on stop.
pub struct Recorder {
    supervisor: Arc<Supervisor>,
    displays: Arc<dyn DisplayProvider>,
    events: Option<Arc<EventBus>>,
    event_builder: EventBuilder,
    active: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    pub fn new(supervisor: Arc<Supervisor>, displays: Arc<dyn DisplayProvider>) -> Self {
        Self {
            supervisor,
            displays,
            events: None,
            event_builder: EventBuilder::new("recorder", "main"),
            active: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn state(&self) -> RecorderState {
        match lock_mutex(&self.active, "Recorder::state").as_ref() {
            Some(active) if active.handle.is_alive() => RecorderState::Recording,
            _ => RecorderState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Output path of the running recording, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        lock_mutex(&self.active, "Recorder::current_path")
            .as_ref()
            .filter(|a| a.handle.is_alive())
            .map(|a| a.path.clone())
    }

    pub async fn start(&self, capture: &CaptureSettings) -> CaptureResult<PathBuf> {
        tokio::fs::create_dir_all(&capture.save_dir)
            .await
            .map_err(|e| CaptureError::output(&capture.save_dir, e))?;

        let path = capture.save_dir.join(format!(
            "recording_{}.{}",
            file_stamp_now(),
            capture.format.extension()
        ));

        let mut active = lock_mutex(&self.active, "Recorder::start");
        if let Some(current) = active.as_ref() {
            if current.handle.is_alive() {
                return Err(CaptureError::invalid_state(
                    "recorder",
                    RecorderState::Recording.as_str(),
                    "start",
                ));
            }
        }

        let job = CaptureJobSpec {
            geometry: self.geometry(&capture.screen_id),
            frame_rate: capture.frame_rate,
            bit_rate_kbps: capture.bit_rate_kbps,
            duration_cap: None,
            format: capture.format,
            output_path: path.clone(),
        };

        let handle = self.supervisor.start(job)?;
        *active = Some(ActiveRecording {
            handle,
            path: path.clone(),
            started: Instant::now(),
        });
        drop(active);

        self.info(&format!("recording to {}", path.display()));
        self.emit_started(&path);
        Ok(path)
    }

    /// Finalizes the running recording. The result is usable if the encoder
    /// left a non-empty file behind, whatever its exit code.
    pub async fn stop(&self) -> CaptureResult<Recording> {
        let Some(active) = lock_mutex(&self.active, "Recorder::stop").take() else {
            return Err(CaptureError::invalid_state(
                "recorder",
                RecorderState::Idle.as_str(),
                "stop",
            ));
        };

        let grace = self.supervisor.encoder().grace();
        let exit = active.handle.request_stop(grace).await;
        let elapsed = active.started.elapsed();
        let bytes = file_len(&active.path).await;

        self.info(&format!(
            "recording {} finished ({}, {:.1}s, {} bytes)",
            active.path.display(),
            exit,
            elapsed.as_secs_f64(),
            bytes
        ));
        if let Some(bus) = &self.events {
            bus.emit(self.event_builder.recording_stopped(&active.path, &exit.to_string()));
        }

        if bytes == 0 {
            return Err(CaptureError::job_invalid(
                &active.path,
                format!("no output after {}", exit),
            ));
        }

        Ok(Recording {
            path: active.path,
            exit,
            elapsed,
            bytes,
        })
    }

    fn geometry(&self, screen_id: &str) -> Option<display::Geometry> {
        let geometry = display::resolve(self.displays.as_ref(), screen_id);
        if geometry.is_none() && !screen_id.trim().is_empty() {
            self.warn(&format!(
                "display '{}' not found, capturing the whole desktop",
                screen_id
            ));
        }
        geometry
    }

    fn emit_started(&self, path: &Path) {
        if let Some(bus) = &self.events {
            bus.emit(self.event_builder.recording_started(path));
        }
    }
}

impl RecorderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
        }
    }
}

impl ComponentLogger for Recorder {
    fn log_context(&self) -> LogContext {
        LogContext::new("Recorder", "main")
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
