//! Property tests for segment retention and window selection.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use proptest::collection::vec;
use proptest::prelude::*;

use replay_node::replay::{RetentionPolicy, Segment, SegmentLedger};

const SEGMENT: Duration = Duration::from_secs(10);

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Segments at cumulative offsets; paths point nowhere so dropping is a no-op.
fn ledger_with(base: Instant, gaps: &[u64], policy: RetentionPolicy) -> SegmentLedger {
    let mut ledger = SegmentLedger::new(policy);
    let mut t = 0;
    for (i, gap) in gaps.iter().enumerate() {
        t += gap;
        ledger.insert(Segment::adopt(
            format!("/nonexistent/segment_{i}.mkv"),
            base + ms(t),
            SEGMENT,
        ));
    }
    ledger
}

proptest! {
    #[test]
    fn eviction_respects_retention(
        gaps in vec(0u64..20_000, 1..40),
        window_s in 1u64..120,
        margin_s in 0u64..60,
        mut probes in vec(0u64..600_000, 1..10),
    ) {
        let base = Instant::now();
        let policy = RetentionPolicy::new(Duration::from_secs(window_s), Duration::from_secs(margin_s));
        let mut ledger = ledger_with(base, &gaps, policy);

        probes.sort_unstable();
        for probe in probes {
            let now = base + ms(probe);
            let evicted = ledger.evict_expired(now);

            for segment in &evicted {
                prop_assert!(segment.age(now) > policy.retention());
            }
            for segment in ledger.iter() {
                prop_assert!(segment.age(now) <= policy.retention());
            }

            let before: Vec<PathBuf> = ledger.iter().map(|s| s.path().to_path_buf()).collect();
            prop_assert!(ledger.evict_expired(now).is_empty());
            let after: Vec<PathBuf> = ledger.iter().map(|s| s.path().to_path_buf()).collect();
            prop_assert_eq!(before, after);
        }
    }

    #[test]
    fn select_window_is_exact_and_ordered(
        gaps in vec(0u64..20_000, 0..40),
        now_offset in 0u64..800_000,
        window_ms in 0u64..300_000,
    ) {
        let base = Instant::now();
        let policy = RetentionPolicy::new(Duration::from_secs(120), Duration::from_secs(60));
        let ledger = ledger_with(base, &gaps, policy);
        let now = base + ms(now_offset);
        let window = ms(window_ms);

        let selected = ledger.select_window(now, window);
        let expected: Vec<PathBuf> = ledger
            .iter()
            .filter(|s| s.age(now) <= window)
            .map(|s| s.path().to_path_buf())
            .collect();
        let got: Vec<PathBuf> = selected.iter().map(|s| s.path().to_path_buf()).collect();
        prop_assert_eq!(got, expected);

        for pair in selected.windows(2) {
            prop_assert!(pair[0].created_at() <= pair[1].created_at());
        }
    }

    #[test]
    fn insertion_keeps_chronological_order(offsets in vec(0u64..100_000, 1..30)) {
        let base = Instant::now();
        let mut ledger = SegmentLedger::new(RetentionPolicy::new(
            Duration::from_secs(120),
            Duration::from_secs(60),
        ));
        for (i, offset) in offsets.iter().enumerate() {
            ledger.insert(Segment::adopt(
                format!("/nonexistent/segment_{i}.mkv"),
                base + ms(*offset),
                SEGMENT,
            ));
        }

        prop_assert_eq!(ledger.len(), offsets.len());
        let created: Vec<Instant> = ledger.iter().map(|s| s.created_at()).collect();
        for pair in created.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }
}
