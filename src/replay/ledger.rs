use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::segment::Segment;
use crate::core::lock::lock_mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
    pub margin: Duration,
}

impl RetentionPolicy {
    pub fn new(window: Duration, margin: Duration) -> Self {
        Self { window, margin }
    }

    /// Maximum age a segment may reach before it is evicted.
    pub fn retention(&self) -> Duration {
        self.window.saturating_add(self.margin)
    }
}

/// Chronologically ordered registry of finished segments.
#[derive(Debug)]
pub struct SegmentLedger {
    segments: VecDeque<Segment>,
    policy: RetentionPolicy,
}

impl SegmentLedger {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            segments: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Adds a segment. Duplicates (same artifact path) are ignored and the
    /// existing entry keeps ownership of the file.
    pub fn insert(&mut self, segment: Segment) -> bool {
        if self.segments.iter().any(|s| s.path() == segment.path()) {
            log::warn!(
                "[ledger] duplicate segment {} ignored",
                segment.path().display()
            );
            segment.release();
            return false;
        }

        // jobs run strictly in sequence, so this is almost always the tail
        let pos = self
            .segments
            .iter()
            .rposition(|s| s.created_at() <= segment.created_at())
            .map(|i| i + 1)
            .unwrap_or(0);
        self.segments.insert(pos, segment);
        true
    }

    /// Removes every segment older than window + margin and hands them back;
    /// their artifacts go away when the returned values are dropped.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<Segment> {
        let retention = self.policy.retention();
        let (evicted, kept): (Vec<Segment>, Vec<Segment>) = self
            .segments
            .drain(..)
            .partition(|s| s.age(now) > retention);
        self.segments = kept.into();
        evicted
    }

    /// Segments whose age is at most `window`, oldest first.
    pub fn select_window(&self, now: Instant, window: Duration) -> Vec<Segment> {
        let mut selected: Vec<Segment> = self
            .segments
            .iter()
            .filter(|s| s.age(now) <= window)
            .cloned()
            .collect();
        selected.sort_by_key(|s| s.created_at());
        selected
    }

    pub fn clear(&mut self) -> Vec<Segment> {
        self.segments.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Sum of the nominal durations currently retained.
    pub fn buffered(&self) -> Duration {
        self.segments.iter().map(Segment::duration).sum()
    }
}

/// The single lock boundary around the ledger shared by the capture loop,
/// the compositor and status queries.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<SegmentLedger>>,
    pins: Arc<AtomicUsize>,
}

/// Marks a save in progress against the ledger's scratch directory. Released
/// on drop, including when the save future is cancelled.
#[derive(Debug)]
pub struct LedgerPin {
    pins: Arc<AtomicUsize>,
}

impl Drop for LedgerPin {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SharedLedger {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SegmentLedger::new(policy))),
            pins: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pin(&self) -> LedgerPin {
        self.pins.fetch_add(1, Ordering::SeqCst);
        LedgerPin {
            pins: self.pins.clone(),
        }
    }

    /// Number of saves currently reading artifacts from this ledger.
    pub fn pinned(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn insert(&self, segment: Segment) -> bool {
        lock_mutex(&self.inner, "SharedLedger::insert").insert(segment)
    }

    /// Returns how many segments were evicted. Files are deleted after the
    /// lock is released.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let evicted = lock_mutex(&self.inner, "SharedLedger::evict_expired").evict_expired(now);
        let count = evicted.len();
        drop(evicted);
        count
    }

    pub fn select_window(&self, now: Instant, window: Duration) -> Vec<Segment> {
        lock_mutex(&self.inner, "SharedLedger::select_window").select_window(now, window)
    }

    pub fn clear(&self) -> usize {
        let cleared = lock_mutex(&self.inner, "SharedLedger::clear").clear();
        let count = cleared.len();
        drop(cleared);
        count
    }

    pub fn len(&self) -> usize {
        lock_mutex(&self.inner, "SharedLedger::len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffered(&self) -> Duration {
        lock_mutex(&self.inner, "SharedLedger::buffered").buffered()
    }

    pub fn policy(&self) -> RetentionPolicy {
        lock_mutex(&self.inner, "SharedLedger::policy").policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SEG: Duration = Duration::from_secs(10);

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[test]
    fn pins_are_released_on_drop() {
        let shared = SharedLedger::new(policy());
        let first = shared.pin();
        let second = shared.clone().pin();
        assert_eq!(shared.pinned(), 2);
        drop(first);
        assert_eq!(shared.pinned(), 1);
        drop(second);
        assert_eq!(shared.pinned(), 0);
    }

    #[test]
    fn eviction_uses_window_plus_margin() {
        let base = Instant::now();
        let mut ledger = SegmentLedger::new(policy());
        ledger.insert(Segment::adopt("/nonexistent/a.mkv", base, SEG));
        ledger.insert(Segment::adopt("/nonexistent/b.mkv", base + Duration::from_secs(5), SEG));

        // exactly at the retention limit: kept
        assert!(ledger.evict_expired(base + Duration::from_secs(40)).is_empty());

        let evicted = ledger.evict_expired(base + Duration::from_secs(41));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].path().to_str(), Some("/nonexistent/a.mkv"));
        assert_eq!(ledger.len(), 1);

        // second sweep with no insert in between changes nothing
        assert!(ledger.evict_expired(base + Duration::from_secs(41)).is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn duplicates_are_rejected_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.mkv");
        fs::write(&path, b"data").unwrap();

        let now = Instant::now();
        let mut ledger = SegmentLedger::new(policy());
        assert!(ledger.insert(Segment::adopt(&path, now, SEG)));
        assert!(!ledger.insert(Segment::adopt(&path, now, SEG)));
        assert_eq!(ledger.len(), 1);
        assert!(path.exists());

        ledger.clear();
        assert!(!path.exists());
    }

    #[test]
    fn out_of_order_insert_keeps_chronology() {
        let base = Instant::now();
        let mut ledger = SegmentLedger::new(policy());
        ledger.insert(Segment::adopt("/nonexistent/2.mkv", base + Duration::from_secs(2), SEG));
        ledger.insert(Segment::adopt("/nonexistent/1.mkv", base + Duration::from_secs(1), SEG));
        ledger.insert(Segment::adopt("/nonexistent/3.mkv", base + Duration::from_secs(3), SEG));

        let order: Vec<_> = ledger.iter().map(|s| s.created_at()).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn snapshot_survives_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.mkv");
        fs::write(&path, b"data").unwrap();

        let now = Instant::now();
        let ledger = SharedLedger::new(policy());
        ledger.insert(Segment::adopt(&path, now, SEG));

        let snapshot = ledger.select_window(now, Duration::from_secs(30));
        assert_eq!(ledger.clear(), 1);
        assert!(path.exists());
        drop(snapshot);
        assert!(!path.exists());
    }

    #[test]
    fn buffered_sums_nominal_durations() {
        let now = Instant::now();
        let ledger = SharedLedger::new(policy());
        ledger.insert(Segment::adopt("/nonexistent/a.mkv", now, SEG));
        ledger.insert(Segment::adopt("/nonexistent/b.mkv", now, Duration::from_secs(4)));
        assert_eq!(ledger.buffered(), Duration::from_secs(14));
    }
}
