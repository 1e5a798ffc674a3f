use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::ledger::SharedLedger;
use super::segment::{Segment, SegmentFile};
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::logging::{ComponentLogger, LogContext};
use crate::core::timestamp::file_stamp_now;
use crate::process::encoder::{concat_args, concat_list};
use crate::process::supervisor::Supervisor;

/// A saved replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayClip {
    pub path: PathBuf,
    pub segments: usize,
    pub nominal_duration: Duration,
    pub bytes: u64,
}

/// Turns a window of ledger segments into one deliverable file.
pub struct Compositor {
    supervisor: Arc<Supervisor>,
    scratch_dir: PathBuf,
    seq: AtomicU64,
}

impl Compositor {
    pub fn new(supervisor: Arc<Supervisor>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            supervisor,
            scratch_dir: scratch_dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Snapshots the last `window` of the ledger and writes it to `output`.
    ///
    /// The snapshot holds its own references to the artifacts, so a
    /// concurrent eviction or buffer stop cannot pull files out from under
    /// the copy/concat step.
    pub async fn compose_window(
        &self,
        ledger: &SharedLedger,
        window: Duration,
        output: &Path,
    ) -> CaptureResult<ReplayClip> {
        let _pin = ledger.pin();
        let snapshot = ledger.select_window(Instant::now(), window);
        if snapshot.is_empty() {
            return Err(CaptureError::NoDataAvailable {
                window_secs: window.as_secs(),
            });
        }
        self.compose(snapshot, output).await
    }

    /// Writes the given segments (chronological order) to `output`.
    pub async fn compose(&self, segments: Vec<Segment>, output: &Path) -> CaptureResult<ReplayClip> {
        if segments.is_empty() {
            return Err(CaptureError::NoDataAvailable { window_secs: 0 });
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::output(output, e))?;
        }

        let result = if segments.len() == 1 {
            self.copy_single(&segments[0], output).await
        } else {
            self.concat(&segments, output).await
        };

        if let Err(e) = result {
            self.warn(&format!("composition of {} failed: {}", output.display(), e));
            remove_quietly(output).await;
            return Err(e);
        }

        let bytes = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .map_err(|e| CaptureError::output(output, e))?;

        let clip = ReplayClip {
            path: output.to_path_buf(),
            segments: segments.len(),
            nominal_duration: segments.iter().map(Segment::duration).sum(),
            bytes,
        };

        self.info(&format!(
            "replay saved to {} ({} segments, {}s, {} bytes)",
            clip.path.display(),
            clip.segments,
            clip.nominal_duration.as_secs(),
            clip.bytes
        ));
        Ok(clip)
    }

    async fn copy_single(&self, segment: &Segment, output: &Path) -> CaptureResult<()> {
        tokio::fs::copy(segment.path(), output)
            .await
            .map(|_| ())
            .map_err(|e| CaptureError::output(output, e))
    }

    async fn concat(&self, segments: &[Segment], output: &Path) -> CaptureResult<()> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| CaptureError::io(format!("creating {}", self.scratch_dir.display()), e))?;

        // fail on an unusable destination before the encoder gets to it
        tokio::fs::File::create(output)
            .await
            .map_err(|e| CaptureError::output(output, e))?;

        // removed on every exit path, cancellation included
        let list = SegmentFile::new(self.scratch_dir.join(format!(
            "concat_{}_{}.txt",
            file_stamp_now(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        )));
        let paths: Vec<PathBuf> = segments.iter().map(|s| s.path().to_path_buf()).collect();

        tokio::fs::write(list.path(), concat_list(&paths))
            .await
            .map_err(|e| CaptureError::io(format!("writing {}", list.path().display()), e))?;

        let exit = self
            .supervisor
            .run_to_exit("concat", concat_args(list.path(), output))
            .await?;
        drop(list);

        if !exit.success() {
            return Err(CaptureError::CompositionFailed { code: exit.code });
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(CaptureError::CompositionFailed { code: exit.code });
        }
        Ok(())
    }
}

impl ComponentLogger for Compositor {
    fn log_context(&self) -> LogContext {
        LogContext::new("Compositor", "replay")
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[compositor] failed to remove {}: {}", path.display(), e);
        }
    }
}
