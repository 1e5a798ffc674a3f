use std::path::PathBuf;
use std::time::Duration;

use crate::config::ReplayConfig;

pub mod buffer;
pub mod compositor;
pub mod ledger;
pub mod segment;

pub use buffer::{BufferState, BufferStats, ReplayBuffer};
pub use compositor::{Compositor, ReplayClip};
pub use ledger::{LedgerPin, RetentionPolicy, SegmentLedger, SharedLedger};
pub use segment::{Segment, SegmentFile};

/// Runtime form of the `[replay]` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySettings {
    pub window: Duration,
    pub eviction_margin: Duration,
    pub segment_duration: Duration,
    pub debounce: Duration,
    pub max_backoff: Duration,
    pub max_bit_rate_kbps: u32,
    pub scratch_dir: PathBuf,
}

impl ReplaySettings {
    pub fn from_config(config: &ReplayConfig, scratch_dir: PathBuf) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            eviction_margin: Duration::from_secs(config.eviction_margin_secs),
            segment_duration: Duration::from_secs(config.segment_secs),
            debounce: Duration::from_millis(config.debounce_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_bit_rate_kbps: config.max_bit_rate_kbps,
            scratch_dir,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.window, self.eviction_margin)
    }

    /// Delay before the next job after `failures` consecutive failures:
    /// the debounce doubled per failure, capped at `max_backoff`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.debounce;
        }
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.debounce
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.debounce))
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default(), PathBuf::from("recordings/replay_temp"))
    }
}
