// src/core/logging.rs
use std::sync::atomic::{AtomicU64, Ordering};

use super::timestamp::utc_ns_now;

// Global sequence number for correlating log lines across components
static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub instance_id: String,
    pub scope: Option<String>,
    pub sequence: u64,
    pub timestamp_ns: u64,
}

impl LogContext {
    pub fn new(component: &str, instance_id: &str) -> Self {
        Self {
            component: component.to_string(),
            instance_id: instance_id.to_string(),
            scope: None,
            sequence: LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_ns: utc_ns_now(),
        }
    }

    /// Narrows the context, e.g. to a single job or segment.
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn format(&self, level: &str, message: &str) -> String {
        let scope_info = match &self.scope {
            Some(scope) => format!(" scope={}", scope),
            None => String::new(),
        };

        format!(
            "[{}][seq={:06}][{}:{}{}] {}",
            level, self.sequence, self.component, self.instance_id, scope_info, message
        )
    }
}

// Helper trait for uniform component logging
pub trait ComponentLogger {
    fn log_context(&self) -> LogContext;

    fn debug(&self, message: &str) {
        let ctx = self.log_context();
        log::debug!("{}", ctx.format("DEBUG", message));
    }

    fn info(&self, message: &str) {
        let ctx = self.log_context();
        log::info!("{}", ctx.format("INFO", message));
    }

    fn warn(&self, message: &str) {
        let ctx = self.log_context();
        log::warn!("{}", ctx.format("WARN", message));
    }

    fn error(&self, message: &str) {
        let ctx = self.log_context();
        log::error!("{}", ctx.format("ERROR", message));
    }
}
