use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{CaptureError, CaptureResult};
use crate::process::supervisor::ProcessExit;

/// Owns one artifact on disk; the file is removed when the last owner drops.
#[derive(Debug)]
pub struct SegmentFile {
    path: PathBuf,
    owned: bool,
}

impl SegmentFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gives up ownership without deleting the file.
    pub fn disown(mut self) -> PathBuf {
        self.owned = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("[segment] removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[segment] failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// One bounded-duration capture unit held by the ledger.
///
/// Clones share the artifact, so a save snapshot keeps its files alive even
/// if the ledger evicts or clears them in the meantime.
#[derive(Debug, Clone)]
pub struct Segment {
    file: Arc<SegmentFile>,
    created_at: Instant,
    duration: Duration,
    bytes: u64,
}

impl Segment {
    /// Takes ownership of a finished job's artifact if it is usable.
    ///
    /// Valid means a successful exit and an existing, non-empty file. On
    /// rejection the partial artifact (if any) is deleted.
    pub fn accept(
        path: PathBuf,
        created_at: Instant,
        duration: Duration,
        exit: &ProcessExit,
    ) -> CaptureResult<Self> {
        let file = SegmentFile::new(path);

        if !exit.success() {
            return Err(CaptureError::job_invalid(
                file.path(),
                format!("encoder finished with {}", exit),
            ));
        }

        let bytes = match fs::metadata(file.path()) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CaptureError::job_invalid(file.path(), "artifact missing"));
            }
            Err(e) => {
                return Err(CaptureError::job_invalid(
                    file.path(),
                    format!("cannot stat artifact: {}", e),
                ));
            }
        };

        if bytes == 0 {
            return Err(CaptureError::job_invalid(file.path(), "artifact empty"));
        }

        Ok(Self {
            file: Arc::new(file),
            created_at,
            duration,
            bytes,
        })
    }

    /// Wraps an artifact without validating it.
    pub fn adopt(path: impl Into<PathBuf>, created_at: Instant, duration: Duration) -> Self {
        let file = SegmentFile::new(path);
        let bytes = fs::metadata(file.path()).map(|m| m.len()).unwrap_or(0);
        Self {
            file: Arc::new(file),
            created_at,
            duration,
            bytes,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Drops this reference without deleting the artifact, provided no other
    /// clone is alive. Used when a duplicate insert is rejected.
    pub(crate) fn release(self) {
        if let Ok(file) = Arc::try_unwrap(self.file) {
            file.disown();
        }
    }
}
