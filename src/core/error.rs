use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Why an external binary could not be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFailureKind {
    NotFound,
    PermissionDenied,
    Other,
}

impl SpawnFailureKind {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SpawnFailureKind::NotFound,
            io::ErrorKind::PermissionDenied => SpawnFailureKind::PermissionDenied,
            _ => SpawnFailureKind::Other,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            SpawnFailureKind::NotFound => "binary not found, check the encoder installation",
            SpawnFailureKind::PermissionDenied => "permission denied, check file permissions",
            SpawnFailureKind::Other => "spawn failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to launch '{program}' ({}): {source}", .kind.hint())]
    Spawn {
        program: String,
        kind: SpawnFailureKind,
        #[source]
        source: io::Error,
    },
    #[error("segment {path:?} rejected: {reason}")]
    JobInvalid { path: PathBuf, reason: String },
    #[error("no replay data available in the last {window_secs}s")]
    NoDataAvailable { window_secs: u64 },
    #[error("composition failed (exit code {code:?})")]
    CompositionFailed { code: Option<i32> },
    #[error("cannot write output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("process ignored graceful stop for {grace:?}, killed")]
    TimeoutEscalation { grace: Duration },
    #[error("{component} is {state}, cannot {action}")]
    InvalidState {
        component: &'static str,
        state: String,
        action: &'static str,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            kind: SpawnFailureKind::from_io(&source),
            source,
        }
    }

    pub fn job_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::JobInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn output(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Output {
            path: path.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_state(
        component: &'static str,
        state: impl std::fmt::Display,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            component,
            state: state.to_string(),
            action,
        }
    }

    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, CaptureError::Spawn { .. })
    }

    /// Short machine-readable tag used in events and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Spawn { .. } => "spawn_failure",
            CaptureError::JobInvalid { .. } => "job_invalid",
            CaptureError::NoDataAvailable { .. } => "no_data_available",
            CaptureError::CompositionFailed { .. } => "composition_failed",
            CaptureError::Output { .. } => "output_error",
            CaptureError::TimeoutEscalation { .. } => "timeout_escalation",
            CaptureError::InvalidState { .. } => "invalid_state",
            CaptureError::Io { .. } => "io_error",
        }
    }
}
