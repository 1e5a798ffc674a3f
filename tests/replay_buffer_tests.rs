#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use replay_node::config::CaptureSettings;
use replay_node::core::{EventBus, EventType};
use replay_node::display::StaticDisplays;
use replay_node::process::{EncoderConfig, Supervisor};
use replay_node::replay::{BufferState, ReplayBuffer, ReplaySettings};
use replay_node::testing::{EventCollector, FakeEncoder};

fn settings(scratch: &Path) -> ReplaySettings {
    ReplaySettings {
        window: Duration::from_secs(30),
        eviction_margin: Duration::from_secs(10),
        segment_duration: Duration::from_secs(1),
        debounce: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        max_bit_rate_kbps: 25_000,
        scratch_dir: scratch.to_path_buf(),
    }
}

fn buffer_with(encoder: EncoderConfig, scratch: &Path) -> ReplayBuffer {
    ReplayBuffer::new(
        "test",
        settings(scratch),
        CaptureSettings::default(),
        Arc::new(Supervisor::new(encoder)),
        Arc::new(StaticDisplays::default()),
    )
}

fn fake_buffer(fake: FakeEncoder, tools: &Path, scratch: &Path) -> ReplayBuffer {
    let encoder = fake.encoder_config(tools, Duration::from_secs(2)).unwrap();
    buffer_with(encoder, scratch)
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_buffer_collects_segments_and_cleans_up_on_stop() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let fake = FakeEncoder {
        ticks: 2,
        ..FakeEncoder::default()
    };
    let buffer = fake_buffer(fake, tools.path(), scratch.path());

    buffer.start().await.unwrap();
    assert_eq!(buffer.state(), BufferState::Running);

    let ledger = buffer.ledger();
    assert!(wait_until(Duration::from_secs(10), || ledger.len() >= 3).await);

    let stats = buffer.stats();
    assert!(stats.segments_captured >= 3);
    assert_eq!(stats.jobs_failed, 0);
    assert!(stats.jobs_started >= stats.segments_captured);

    buffer.stop().await.unwrap();
    assert_eq!(buffer.state(), BufferState::Stopped);
    assert_eq!(ledger.len(), 0);
    assert_eq!(files_in(scratch.path()), 0);
}

#[tokio::test]
async fn test_failing_jobs_do_not_stop_the_loop() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let fake = FakeEncoder {
        exit_code: 1,
        ticks: 1,
        ..FakeEncoder::default()
    };
    let buffer = fake_buffer(fake, tools.path(), scratch.path());

    buffer.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(10), || buffer.stats().jobs_failed >= 3).await);

    assert_eq!(buffer.state(), BufferState::Running);
    assert_eq!(buffer.ledger().len(), 0);
    assert!(buffer.stats().consecutive_failures >= 3);
    assert_eq!(buffer.stats().segments_captured, 0);

    buffer.stop().await.unwrap();
    assert_eq!(files_in(scratch.path()), 0);
}

#[tokio::test]
async fn test_empty_artifacts_are_rejected() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let fake = FakeEncoder {
        create_output: false,
        ticks: 1,
        ..FakeEncoder::default()
    };
    let buffer = fake_buffer(fake, tools.path(), scratch.path());

    buffer.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(10), || buffer.stats().jobs_failed >= 2).await);
    assert!(buffer.ledger().is_empty());
    buffer.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_encoder_keeps_retrying_with_backoff() {
    let scratch = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new("test"));
    let collector = Arc::new(EventCollector::new());
    bus.register_handler(collector.clone());
    bus.start().unwrap();

    let encoder = EncoderConfig {
        program: scratch.path().join("missing-ffmpeg").to_string_lossy().into_owned(),
        ..EncoderConfig::default()
    };
    let buffer = buffer_with(encoder, scratch.path()).with_events(bus.clone());

    buffer.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || buffer.stats().jobs_failed >= 3).await);
    assert_eq!(buffer.state(), BufferState::Running);

    buffer.stop().await.unwrap();
    let collector_ref = collector.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            !collector_ref.of_type(EventType::Error).is_empty()
        })
        .await
    );
    let error = &collector.of_type(EventType::Error)[0];
    assert_eq!(error.payload["error_type"], "spawn_failure");
    bus.stop().unwrap();
}

#[tokio::test]
async fn test_stop_discards_in_flight_segment() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    // every job would run for five seconds
    let fake = FakeEncoder {
        ticks: 100,
        ..FakeEncoder::default()
    };
    let buffer = fake_buffer(fake, tools.path(), scratch.path());

    buffer.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || buffer.stats().jobs_started >= 1).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = Instant::now();
    buffer.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(buffer.state(), BufferState::Stopped);
    assert_eq!(buffer.stats().segments_captured, 0);
    assert_eq!(files_in(scratch.path()), 0);
}

#[tokio::test]
async fn test_start_twice_is_rejected_and_restart_starts_clean() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let fake = FakeEncoder {
        ticks: 2,
        ..FakeEncoder::default()
    };
    let buffer = fake_buffer(fake, tools.path(), scratch.path());

    buffer.start().await.unwrap();
    let err = buffer.start().await.unwrap_err();
    assert_eq!(err.kind(), "invalid_state");

    let ledger = buffer.ledger();
    assert!(wait_until(Duration::from_secs(10), || ledger.len() >= 1).await);
    buffer.stop().await.unwrap();
    assert!(ledger.is_empty());
    assert_eq!(files_in(scratch.path()), 0);

    // stopping again is harmless
    buffer.stop().await.unwrap();

    buffer.start().await.unwrap();
    assert_eq!(buffer.state(), BufferState::Running);
    assert!(wait_until(Duration::from_secs(10), || ledger.len() >= 1).await);
    buffer.stop().await.unwrap();
    assert_eq!(files_in(scratch.path()), 0);
}

#[tokio::test]
async fn test_state_transitions_are_published() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new("states"));
    let collector = Arc::new(EventCollector::new());
    bus.register_handler(collector.clone());
    bus.start().unwrap();

    let buffer = fake_buffer(FakeEncoder::default(), tools.path(), scratch.path())
        .with_events(bus.clone());
    let mut states = buffer.subscribe_state();

    buffer.start().await.unwrap();
    assert_eq!(*states.borrow_and_update(), BufferState::Running);
    buffer.stop().await.unwrap();
    assert_eq!(*states.borrow_and_update(), BufferState::Stopped);

    let collector_ref = collector.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            collector_ref.of_type(EventType::BufferState).len() >= 4
        })
        .await
    );
    let sequence: Vec<String> = collector
        .of_type(EventType::BufferState)
        .iter()
        .map(|e| e.payload["state"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(sequence, vec!["starting", "running", "stopping", "stopped"]);
    bus.stop().unwrap();
}

#[tokio::test]
async fn test_stop_purges_leftovers_written_while_running() {
    let tools = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let buffer = fake_buffer(FakeEncoder::default(), tools.path(), scratch.path());

    buffer.start().await.unwrap();
    // what an abandoned save would leave behind
    std::fs::write(scratch.path().join("concat_abandoned_0.txt"), "file 'x'\n").unwrap();
    std::fs::write(scratch.path().join("segment_abandoned.mkv"), "partial").unwrap();

    buffer.stop().await.unwrap();
    assert_eq!(files_in(scratch.path()), 0);

    buffer.start().await.unwrap();
    std::fs::write(scratch.path().join("concat_abandoned_1.txt"), "file 'y'\n").unwrap();
    buffer.stop().await.unwrap();
    assert_eq!(files_in(scratch.path()), 0);
}
