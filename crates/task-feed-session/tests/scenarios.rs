//! End-to-end feed sessions against the in-memory store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use serde_json::{Value, json};
use task_feed_core::{
    Cursor, EventStore, FeedEvent, Fields, LogFilter, MemoryEventStore, StoreConnector,
    StoreError, StreamId,
};
use task_feed_session::{
    FeedConfig, FeedError, FeedOutcome, FeedProfile, FeedRequest, FeedStream, ReadMode, TaskFeed,
};

const TASK: &str = "t1";
const STATUS_KEY: &str = "agent_install_status:t1";
const LOG_KEY: &str = "agent_install_logs";
const MODES: [ReadMode; 2] = [ReadMode::Direct, ReadMode::Bridged];

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("fields must be an object"),
    }
}

fn config(mode: ReadMode) -> FeedConfig {
    let mut config = FeedConfig {
        block_timeout_ms: 60,
        heartbeat_slack_ms: 10,
        unavailable_backoff_ms: 10,
        error_backoff_ms: 10,
        read_mode: mode,
        ..FeedConfig::default()
    };
    config.bridge.poll_timeout_ms = 60;
    config.bridge.join_timeout_ms = 500;
    config
}

fn feed(store: &MemoryEventStore, config: FeedConfig) -> TaskFeed {
    TaskFeed::new(FeedProfile::agent_install(), config, Arc::new(store.clone()))
}

fn log(store: &MemoryEventStore, task_id: &str, message: &str) -> StreamId {
    store
        .append(LOG_KEY, fields(json!({"task_id": task_id, "message": message})))
        .unwrap()
}

fn status(store: &MemoryEventStore, value: &str) -> StreamId {
    store
        .append(STATUS_KEY, fields(json!({"status": value})))
        .unwrap()
}

async fn next(stream: &mut FeedStream) -> Option<FeedEvent> {
    tokio::time::timeout(Duration::from_secs(3), stream.recv())
        .await
        .expect("feed stalled")
}

async fn expect_next(stream: &mut FeedStream) -> FeedEvent {
    next(stream).await.expect("feed ended early")
}

/// Next event that is not a heartbeat.
async fn next_content(stream: &mut FeedStream) -> Option<FeedEvent> {
    loop {
        match next(stream).await {
            Some(FeedEvent::Heartbeat { .. }) => {}
            other => return other,
        }
    }
}

async fn drain(stream: &mut FeedStream) -> Vec<FeedEvent> {
    let mut events = Vec::new();
    while let Some(event) = next(stream).await {
        events.push(event);
    }
    events
}

fn sequence(id: &StreamId) -> (u64, u64) {
    let (millis, seq) = id.as_str().split_once('-').unwrap();
    (millis.parse().unwrap(), seq.parse().unwrap())
}

fn message(event: &FeedEvent) -> &str {
    match event {
        FeedEvent::Log(record) => &record.message,
        FeedEvent::Error { message } => message,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_fresh_connect_replays_history_then_goes_live() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, TASK, "one");
        log(&store, TASK, "two");
        status(&store, "running");
        log(&store, TASK, "three");

        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));

        let FeedEvent::ConnectionEstablished { task_id, feed, .. } = expect_next(&mut stream).await
        else {
            panic!("connection_established must come first");
        };
        assert_eq!(task_id, TASK);
        assert_eq!(feed, "install");

        let FeedEvent::Status(record) = expect_next(&mut stream).await else {
            panic!("status history comes before log history");
        };
        assert_eq!(record.status, "running");

        for expected in ["one", "two", "three"] {
            assert_eq!(message(&expect_next(&mut stream).await), expected);
        }

        // Live: idle reads produce heartbeats, the session stays open.
        assert!(matches!(
            expect_next(&mut stream).await,
            FeedEvent::Heartbeat { .. }
        ));
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Closed, "{mode:?}");
    }
}

#[tokio::test]
async fn test_live_terminal_status_ends_feed_without_further_reads() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));

        expect_next(&mut stream).await;
        // Wait for the live phase.
        assert!(matches!(
            expect_next(&mut stream).await,
            FeedEvent::Heartbeat { .. }
        ));

        status(&store, "failed");
        let FeedEvent::Status(record) = next_content(&mut stream).await.unwrap() else {
            panic!("expected the terminal status");
        };
        assert_eq!(record.status, "failed");
        assert!(next(&mut stream).await.is_none());
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Completed);

        let reads = store.tail_reads();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.tail_reads(), reads, "{mode:?}");
    }
}

#[tokio::test]
async fn test_terminal_status_in_history_skips_live_phase() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, TASK, "installing");
        status(&store, "completed");
        log(&store, TASK, "cleanup");

        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));
        let events = drain(&mut stream).await;

        let kinds: Vec<_> = events.iter().map(FeedEvent::kind).collect();
        // History is not truncated at the terminal status.
        assert_eq!(kinds, ["connection_established", "status", "log", "log"]);
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Completed);
        assert_eq!(store.tail_reads(), 0, "{mode:?}");
    }
}

#[tokio::test]
async fn test_persistent_unavailability_ends_after_error_cap() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        store.set_connected(false);

        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));
        let events = drain(&mut stream).await;

        assert_eq!(events[0].kind(), "connection_established");
        let errors: Vec<_> = events[1..]
            .iter()
            .filter(|e| e.kind() != "heartbeat")
            .map(message)
            .collect();
        assert_eq!(errors.len(), 5, "{mode:?}: {errors:?}");
        assert!(errors[0].contains("retrying (1/5)"));
        assert!(errors[3].contains("retrying (4/5)"));
        assert!(errors[4].contains("giving up"));

        assert!(matches!(
            stream.join().await.unwrap(),
            FeedOutcome::Failed(FeedError::StoreUnavailable(_))
        ));
    }
}

#[tokio::test]
async fn test_transient_read_failures_recover() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        let resume = log(&store, TASK, "old");
        store.fail_reads(2);
        log(&store, TASK, "new");

        let request = FeedRequest::new(TASK).resume(Cursor::After(resume));
        let mut stream = feed(&store, config(mode)).open(request);
        expect_next(&mut stream).await;

        assert!(message(&expect_next(&mut stream).await).contains("retrying (1/5)"));
        assert!(message(&expect_next(&mut stream).await).contains("retrying (2/5)"));
        assert_eq!(message(&expect_next(&mut stream).await), "new");
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Closed, "{mode:?}");
    }
}

#[tokio::test]
async fn test_resume_skips_history_and_reads_strictly_after() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, TASK, "one");
        status(&store, "running");
        let last = log(&store, TASK, "two");

        let request = FeedRequest::new(TASK).resume(Cursor::After(last.clone()));
        let mut stream = feed(&store, config(mode)).open(request);
        expect_next(&mut stream).await;

        log(&store, TASK, "three");
        let event = next_content(&mut stream).await.unwrap();
        assert_eq!(message(&event), "three");
        assert!(sequence(event.id().unwrap()) > sequence(&last));
        assert_eq!(store.range_reads(), 0, "{mode:?}");
        stream.join().await.unwrap();
    }
}

#[tokio::test]
async fn test_zero_replay_count_starts_after_newest_entry() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        status(&store, "running");
        log(&store, TASK, "old one");
        log(&store, TASK, "old two");

        let mut config = config(mode);
        config.log_replay_count = 0;
        let mut stream = feed(&store, config).open(FeedRequest::new(TASK));
        expect_next(&mut stream).await;

        let FeedEvent::Status(record) = expect_next(&mut stream).await else {
            panic!("{mode:?}: status history should still replay");
        };
        assert_eq!(record.status, "running");

        log(&store, TASK, "fresh");
        assert_eq!(message(&next_content(&mut stream).await.unwrap()), "fresh", "{mode:?}");
        stream.join().await.unwrap();
    }
}

#[tokio::test]
async fn test_reconnect_never_redelivers() {
    let store = MemoryEventStore::new();
    log(&store, TASK, "one");
    log(&store, TASK, "two");
    let first_feed = feed(&store, config(ReadMode::Bridged));

    let mut first = first_feed.open(FeedRequest::new(TASK));
    expect_next(&mut first).await;
    expect_next(&mut first).await;
    let last = expect_next(&mut first).await.id().cloned().unwrap();
    first.join().await.unwrap();

    log(&store, TASK, "three");
    status(&store, "completed");

    let mut second = first_feed.open(FeedRequest::new(TASK).resume(Cursor::After(last.clone())));
    let events = drain(&mut second).await;
    let ids: Vec<_> = events.iter().filter_map(FeedEvent::id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| sequence(id) > sequence(&last)));
    assert_eq!(second.join().await.unwrap(), FeedOutcome::Completed);
}

#[tokio::test]
async fn test_per_stream_ids_strictly_increase() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, TASK, "before connect");

        let producer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for step in 0..30 {
                    log(&store, TASK, &format!("line {step}"));
                    if step % 3 == 0 {
                        status(&store, "running");
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                status(&store, "completed");
            })
        };

        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));
        let events = drain(&mut stream).await;
        producer.join().unwrap();

        let mut last_log = (0, 0);
        let mut last_status = (0, 0);
        let mut logs = 0;
        for event in &events {
            match event {
                FeedEvent::Log(record) => {
                    let id = sequence(&record.id);
                    assert!(id > last_log, "{mode:?}: log ids out of order");
                    last_log = id;
                    logs += 1;
                }
                FeedEvent::Status(record) => {
                    let id = sequence(&record.id);
                    assert!(id > last_status, "{mode:?}: status ids out of order");
                    last_status = id;
                }
                _ => {}
            }
        }
        assert_eq!(logs, 31, "{mode:?}");
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Completed);
    }
}

fn emitted_at(timestamp: &str) -> chrono::DateTime<chrono::FixedOffset> {
    chrono::DateTime::parse_from_rfc3339(timestamp).unwrap()
}

#[tokio::test]
async fn test_heartbeat_cadence() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        let mut config = config(mode);
        config.block_timeout_ms = 100;
        config.heartbeat_slack_ms = 20;
        let window = chrono::Duration::from_std(config.heartbeat_interval()).unwrap();

        let mut stream = feed(&store, config).open(FeedRequest::new(TASK));
        expect_next(&mut stream).await;

        let started = Instant::now();
        let mut beats = Vec::new();
        while started.elapsed() < Duration::from_millis(650) {
            if let FeedEvent::Heartbeat { timestamp } = expect_next(&mut stream).await {
                beats.push(emitted_at(&timestamp));
            }
        }

        assert!((4..=8).contains(&beats.len()), "{mode:?}: {} heartbeats", beats.len());
        for pair in beats.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= window, "{mode:?}: heartbeats {gap} apart");
        }
        stream.join().await.unwrap();
    }
}

#[tokio::test]
async fn test_slow_viewer_saturates_bridge() {
    let store = MemoryEventStore::new();
    let first = log(&store, TASK, "first");
    for line in 0..40 {
        log(&store, TASK, &format!("line {line}"));
    }

    let mut config = config(ReadMode::Bridged);
    config.read_count = 1;
    config.event_buffer = 1;
    config.bridge.queue_capacity = 2;
    config.bridge.enqueue_timeout_ms = 10;
    config.bridge.max_enqueue_failures = 2;

    let request = FeedRequest::new(TASK).resume(Cursor::After(first));
    let mut stream = feed(&store, config).open(request);

    // Not reading: the worker fills the queue and gives up.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = drain(&mut stream).await;
    let logs = events.iter().filter(|e| e.kind() == "log").count();
    assert!(logs < 40, "{logs} logs delivered");

    let last = events.last().unwrap();
    assert_eq!(last.kind(), "error");
    assert!(message(last).contains("not keeping up"));
    assert_eq!(
        stream.join().await.unwrap(),
        FeedOutcome::Failed(FeedError::BridgeSaturated)
    );
}

#[tokio::test]
async fn test_shared_log_stream_only_carries_own_task() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, "other", "not mine");
        log(&store, TASK, "mine");
        store
            .append(LOG_KEY, fields(json!({"execution_id": TASK, "content": "by execution id"})))
            .unwrap();

        let mut stream = feed(&store, config(mode)).open(FeedRequest::new(TASK));
        expect_next(&mut stream).await;
        assert_eq!(message(&expect_next(&mut stream).await), "mine");
        assert_eq!(message(&expect_next(&mut stream).await), "by execution id");

        log(&store, "other", "still not mine");
        log(&store, TASK, "live");
        assert_eq!(message(&next_content(&mut stream).await.unwrap()), "live");
        stream.join().await.unwrap();
    }
}

#[tokio::test]
async fn test_viewer_filters_apply_and_are_echoed() {
    let store = MemoryEventStore::new();
    for (host, step) in [("h1", "1"), ("h2", "1"), ("h1", "2")] {
        store
            .append(
                LOG_KEY,
                fields(json!({
                    "task_id": TASK,
                    "host_id": host,
                    "step_order": step,
                    "message": format!("{host} step {step}"),
                })),
            )
            .unwrap();
    }

    let filter = LogFilter {
        host_id: Some("h1".into()),
        step_id: Some("step_2".into()),
    };
    let mut stream = feed(&store, config(ReadMode::Direct))
        .open(FeedRequest::new(TASK).filter(filter.clone()));

    let FeedEvent::ConnectionEstablished { filters, .. } = expect_next(&mut stream).await else {
        panic!("connection_established must come first");
    };
    assert_eq!(filters, filter);
    assert_eq!(message(&expect_next(&mut stream).await), "h1 step 2");
    assert!(matches!(
        expect_next(&mut stream).await,
        FeedEvent::Heartbeat { .. }
    ));
    stream.join().await.unwrap();
}

#[tokio::test]
async fn test_malformed_status_is_skipped() {
    let store = MemoryEventStore::new();
    store
        .append(STATUS_KEY, fields(json!({"detail": "no status here"})))
        .unwrap();
    status(&store, "completed");

    let mut stream = feed(&store, config(ReadMode::Direct)).open(FeedRequest::new(TASK));
    let events = drain(&mut stream).await;
    let kinds: Vec<_> = events.iter().map(FeedEvent::kind).collect();
    assert_eq!(kinds, ["connection_established", "status"]);
}

#[tokio::test]
async fn test_connect_failure_is_retried_up_to_the_cap() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let connector = move || -> Result<Arc<dyn EventStore>, StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Connect("connection refused".into()))
    };
    let connector: Arc<dyn StoreConnector> = Arc::new(connector);
    let feed = TaskFeed::new(FeedProfile::agent_install(), config(ReadMode::Direct), connector);

    let mut stream = feed.open(FeedRequest::new(TASK));
    let events = drain(&mut stream).await;
    let errors: Vec<_> = events[1..].iter().map(message).collect();
    assert_eq!(errors.len(), 5, "{errors:?}");
    assert!(errors.iter().all(|e| e.contains("connection refused")));
    assert!(errors[0].ends_with("retrying (1/5)"));
    assert!(errors[4].contains("giving up after 5 consecutive failures"));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        stream.join().await.unwrap(),
        FeedOutcome::Failed(FeedError::StoreUnavailable("connection refused".into()))
    );
}

#[tokio::test]
async fn test_connect_recovers_after_transient_failure() {
    for mode in MODES {
        let store = MemoryEventStore::new();
        log(&store, TASK, "history");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backing = store.clone();
        let connector = move || -> Result<Arc<dyn EventStore>, StoreError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Connect("transient".into()));
            }
            Ok(Arc::new(backing.clone()))
        };
        let connector: Arc<dyn StoreConnector> = Arc::new(connector);
        let feed = TaskFeed::new(FeedProfile::agent_install(), config(mode), connector);

        let mut stream = feed.open(FeedRequest::new(TASK));
        expect_next(&mut stream).await;
        assert!(message(&expect_next(&mut stream).await).contains("retrying (1/5)"));
        assert_eq!(message(&expect_next(&mut stream).await), "history");

        log(&store, TASK, "live");
        assert_eq!(message(&next_content(&mut stream).await.unwrap()), "live");
        status(&store, "completed");
        let last = next_content(&mut stream).await.unwrap();
        assert_eq!(last.kind(), "status");

        assert_eq!(calls.load(Ordering::SeqCst), 2, "{mode:?}");
        assert_eq!(stream.join().await.unwrap(), FeedOutcome::Completed);
    }
}

#[tokio::test]
async fn test_job_profile_filters_shared_status_stream() {
    let store = MemoryEventStore::new();
    store
        .append("agent_results", fields(json!({"execution_id": "other", "status": "completed"})))
        .unwrap();
    store
        .append("job_logs", fields(json!({"execution_id": "42", "message": "running"})))
        .unwrap();

    let feed = TaskFeed::new(
        FeedProfile::job_execution(),
        config(ReadMode::Bridged),
        Arc::new(store.clone()),
    );
    let mut stream = feed.open(FeedRequest::new("42"));
    expect_next(&mut stream).await;
    assert_eq!(message(&expect_next(&mut stream).await), "running");

    store
        .append("agent_results", fields(json!({"execution_id": "42", "status": "success"})))
        .unwrap();
    let FeedEvent::Status(record) = next_content(&mut stream).await.unwrap() else {
        panic!("expected this job's status");
    };
    assert_eq!(record.status, "success");
    assert!(next(&mut stream).await.is_none());
}
