#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use replay_node::CaptureError;
use replay_node::process::Supervisor;
use replay_node::replay::{Compositor, RetentionPolicy, Segment, SharedLedger};
use replay_node::testing::FakeEncoder;

const SEGMENT: Duration = Duration::from_secs(10);

fn compositor(fake: FakeEncoder, tools: &Path, scratch: &Path) -> Compositor {
    let encoder = fake.encoder_config(tools, Duration::from_secs(2)).unwrap();
    Compositor::new(Arc::new(Supervisor::new(encoder)), scratch)
}

fn ledger() -> SharedLedger {
    SharedLedger::new(RetentionPolicy::new(
        Duration::from_secs(120),
        Duration::from_secs(60),
    ))
}

fn write_segment(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn ago(secs: u64) -> Instant {
    Instant::now()
        .checked_sub(Duration::from_secs(secs))
        .expect("monotonic clock too young for test")
}

#[tokio::test]
async fn test_single_segment_copy_is_byte_identical() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let body: String = (0..4096).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let source = write_segment(scratch.path(), "segment_1.mkv", &body);
    let ledger = ledger();
    ledger.insert(Segment::adopt(&source, ago(3), SEGMENT));

    let output = out_dir.path().join("replay.mkv");
    let clip = compositor(FakeEncoder::default(), tools.path(), scratch.path())
        .compose_window(&ledger, Duration::from_secs(30), &output)
        .await
        .unwrap();

    assert_eq!(clip.segments, 1);
    assert_eq!(clip.bytes, 4096);
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&source).unwrap());
    // the ledger still owns its artifact
    assert!(source.exists());
}

#[tokio::test]
async fn test_window_selects_recent_segments_and_concatenates_in_order() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let ledger = ledger();
    for (i, age) in [30u64, 20, 10].iter().enumerate() {
        let path = write_segment(
            scratch.path(),
            &format!("segment_{i}.mkv"),
            &format!("segment-{i}\n"),
        );
        ledger.insert(Segment::adopt(path, ago(*age), SEGMENT));
    }

    let output = out_dir.path().join("replay.mkv");
    let clip = compositor(FakeEncoder::default(), tools.path(), scratch.path())
        .compose_window(&ledger, Duration::from_secs(25), &output)
        .await
        .unwrap();

    assert_eq!(clip.segments, 2);
    assert_eq!(clip.nominal_duration, Duration::from_secs(20));
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "segment-1\nsegment-2\n"
    );

    let leftovers: Vec<_> = std::fs::read_dir(scratch.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("concat_"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_failed_concat_reports_code_and_removes_output() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let ledger = ledger();
    for i in 0..2 {
        let path = write_segment(scratch.path(), &format!("segment_{i}.mkv"), "data");
        ledger.insert(Segment::adopt(path, ago(5 - i), SEGMENT));
    }

    let output = out_dir.path().join("replay.mkv");
    std::fs::write(&output, "stale partial").unwrap();

    let fake = FakeEncoder {
        concat_exit: 3,
        ..FakeEncoder::default()
    };
    let err = compositor(fake, tools.path(), scratch.path())
        .compose_window(&ledger, Duration::from_secs(30), &output)
        .await
        .unwrap_err();

    match err {
        CaptureError::CompositionFailed { code } => assert_eq!(code, Some(3)),
        other => panic!("expected composition failure, got {:?}", other),
    }
    assert!(!output.exists());
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn test_empty_window_is_no_data() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let ledger = ledger();
    let path = write_segment(scratch.path(), "segment_old.mkv", "old");
    ledger.insert(Segment::adopt(path, ago(50), SEGMENT));

    let err = compositor(FakeEncoder::default(), tools.path(), scratch.path())
        .compose_window(&ledger, Duration::from_secs(20), &scratch.path().join("out.mkv"))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::NoDataAvailable { window_secs: 20 }));
}

#[tokio::test]
async fn test_snapshot_outlives_concurrent_clear() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let ledger = ledger();
    let mut paths = Vec::new();
    for i in 0..2 {
        let path = write_segment(scratch.path(), &format!("segment_{i}.mkv"), &format!("{i}\n"));
        paths.push(path.clone());
        ledger.insert(Segment::adopt(path, ago(4 - i), SEGMENT));
    }

    let snapshot = ledger.select_window(Instant::now(), Duration::from_secs(30));
    assert_eq!(ledger.clear(), 2);
    assert!(paths.iter().all(|p| p.exists()));

    let output = out_dir.path().join("replay.mkv");
    let clip = compositor(FakeEncoder::default(), tools.path(), scratch.path())
        .compose(snapshot, &output)
        .await
        .unwrap();

    assert_eq!(clip.segments, 2);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "0\n1\n");
    assert!(paths.iter().all(|p| !p.exists()));
}

fn concat_lists_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("concat_"))
        .collect()
}

#[tokio::test]
async fn test_unwritable_output_is_output_error_for_copy_and_concat() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    // a directory where the clip should go
    let output = out_dir.path().join("replay.mkv");
    std::fs::create_dir_all(&output).unwrap();

    let ledger = ledger();
    for i in 0..2 {
        let path = write_segment(scratch.path(), &format!("segment_{i}.mkv"), "data");
        ledger.insert(Segment::adopt(path, ago(3 - i), SEGMENT));
    }
    let compositor = compositor(FakeEncoder::default(), tools.path(), scratch.path());

    let single = ledger.select_window(Instant::now(), Duration::from_secs(30));
    let err = compositor
        .compose(single[1..].to_vec(), &output)
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Output { .. }), "got {:?}", err);

    let err = compositor
        .compose_window(&ledger, Duration::from_secs(30), &output)
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::Output { .. }), "got {:?}", err);
    assert_eq!(err.kind(), "output_error");

    assert!(output.is_dir());
    assert!(concat_lists_in(scratch.path()).is_empty());
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn test_cancelled_save_removes_concat_list() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let ledger = ledger();
    for i in 0..2 {
        let path = write_segment(scratch.path(), &format!("segment_{i}.mkv"), "data");
        ledger.insert(Segment::adopt(path, ago(3 - i), SEGMENT));
    }

    // concat takes three seconds
    let fake = FakeEncoder {
        concat_ticks: 60,
        ..FakeEncoder::default()
    };
    let compositor = compositor(fake, tools.path(), scratch.path());
    let output = out_dir.path().join("replay.mkv");

    let save = compositor.compose_window(&ledger, Duration::from_secs(30), &output);
    let outcome = tokio::time::timeout(Duration::from_millis(300), save).await;
    assert!(outcome.is_err());

    assert!(concat_lists_in(scratch.path()).is_empty());
    assert_eq!(ledger.pinned(), 0);
    assert_eq!(ledger.len(), 2);
}
