// src/core/events.rs
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::timestamp::utc_ns_now;

/// Event types published to the status layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    BufferState,
    SegmentRejected,
    ReplaySaved,
    ReplaySaveFailed,
    RecordingStarted,
    RecordingStopped,
    Error,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventPriority {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Serialisable notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: u64,
    pub event_type: EventType,
    pub priority: EventPriority,

    /// logical source (e.g. "replay", "recorder")
    pub source: String,

    /// concrete instance (e.g. "main")
    pub source_instance: String,

    pub payload: serde_json::Value,

    pub correlation_id: Option<String>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        priority: EventPriority,
        source: &str,
        source_instance: &str,
        payload: serde_json::Value,
    ) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        Self {
            id: COUNTER.fetch_add(1, Ordering::SeqCst),
            timestamp: utc_ns_now(),
            event_type,
            priority,
            source: source.to_string(),
            source_instance: source_instance.to_string(),
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn format_message(&self) -> String {
        let corr = self
            .correlation_id
            .as_deref()
            .map(|c| format!("[corr={}] ", c))
            .unwrap_or_default();

        format!(
            "[{}][{}] {}{:?}: {}",
            self.priority_str(),
            self.source,
            corr,
            self.event_type,
            self.payload_str()
        )
    }

    fn priority_str(&self) -> &str {
        match self.priority {
            EventPriority::Debug => "DEBUG",
            EventPriority::Info => "INFO",
            EventPriority::Warning => "WARN",
            EventPriority::Error => "ERROR",
            EventPriority::Critical => "CRITICAL",
        }
    }

    pub fn payload_str(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "null".to_string(),
            _ => self.payload.to_string(),
        }
    }
}

/// Convenience builder bound to one source
#[derive(Debug, Clone)]
pub struct EventBuilder {
    source: String,
    source_instance: String,
}

impl EventBuilder {
    pub fn new(source: &str, source_instance: &str) -> Self {
        Self {
            source: source.to_string(),
            source_instance: source_instance.to_string(),
        }
    }

    fn build(
        &self,
        event_type: EventType,
        priority: EventPriority,
        payload: serde_json::Value,
    ) -> Event {
        Event::new(
            event_type,
            priority,
            &self.source,
            &self.source_instance,
            payload,
        )
    }

    pub fn buffer_state(&self, state: &str) -> Event {
        self.build(
            EventType::BufferState,
            EventPriority::Info,
            serde_json::json!({ "state": state }),
        )
    }

    pub fn segment_rejected(&self, path: &Path, reason: &str) -> Event {
        self.build(
            EventType::SegmentRejected,
            EventPriority::Warning,
            serde_json::json!({
                "path": path.display().to_string(),
                "reason": reason,
            }),
        )
    }

    pub fn replay_saved(&self, path: &Path, segments: usize, duration_secs: f64) -> Event {
        self.build(
            EventType::ReplaySaved,
            EventPriority::Info,
            serde_json::json!({
                "path": path.display().to_string(),
                "segments": segments,
                "duration_secs": duration_secs,
            }),
        )
    }

    pub fn replay_save_failed(&self, kind: &str, reason: &str) -> Event {
        self.build(
            EventType::ReplaySaveFailed,
            EventPriority::Warning,
            serde_json::json!({ "kind": kind, "reason": reason }),
        )
    }

    pub fn recording_started(&self, path: &Path) -> Event {
        self.build(
            EventType::RecordingStarted,
            EventPriority::Info,
            serde_json::json!({ "path": path.display().to_string() }),
        )
    }

    pub fn recording_stopped(&self, path: &Path, exit: &str) -> Event {
        self.build(
            EventType::RecordingStopped,
            EventPriority::Info,
            serde_json::json!({
                "path": path.display().to_string(),
                "exit": exit,
            }),
        )
    }

    pub fn error(&self, error_type: &str, message: &str) -> Event {
        self.build(
            EventType::Error,
            EventPriority::Error,
            serde_json::json!({
                "error_type": error_type,
                "message": message,
            }),
        )
    }
}
