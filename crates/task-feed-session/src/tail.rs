//! Live tail sources.
//!
//! The live loop pulls from a `TailSource`, which hides whether the
//! blocking store is read on the runtime's blocking pool (`DirectTail`) or
//! by a dedicated bridge worker (`BridgedTail`).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use task_feed_bridge::{BlockingSource, Bridge, EndOfStream, Received, StopSignal};
use task_feed_core::{
    Cursor, EventStore, RawEntry, StatusRecord, StreamBatch, TailRequest, TerminalPolicy,
};

use crate::{
    FeedConfig, FeedError, FeedProfile, Session,
    profile::{StreamKeys, StreamKind},
};

const PROBE_FAILED: &str = "connectivity check failed";

/// One entry read from the store, tagged with its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TailItem {
    pub kind: StreamKind,
    pub entry: RawEntry,
}

/// What one pull from a tail source produced.
#[derive(Debug)]
pub enum TailEvent {
    /// Entries in store order per stream.
    Batch(Vec<TailItem>),
    /// A read succeeded but found nothing new.
    Idle,
    /// Nothing arrived within the wait window; says nothing about the store.
    Waiting,
    /// A retryable failure.
    Failed(FeedError),
    /// The source cannot produce anything more.
    Ended(FeedError),
}

/// Live reads on behalf of one session.
#[async_trait]
pub trait TailSource: Send {
    /// Wait for the next event. Must return within a bounded time.
    async fn next(&mut self, session: &Session) -> TailEvent;

    /// Release the source, stopping any worker it owns.
    async fn close(self: Box<Self>);
}

fn tail_request(
    keys: &StreamKeys,
    status: &Cursor,
    log: &Cursor,
    count: usize,
    block: Duration,
) -> TailRequest {
    TailRequest {
        streams: vec![
            (keys.status.clone(), status.clone()),
            (keys.log.clone(), log.clone()),
        ],
        count,
        block,
    }
}

fn tag(keys: &StreamKeys, batches: Vec<StreamBatch>) -> Vec<TailItem> {
    let mut items = Vec::new();
    for batch in batches {
        let Some(kind) = keys.kind_of(&batch.key) else {
            tracing::warn!(stream = %batch.key, "Ignoring entries from an unrequested stream");
            continue;
        };
        items.extend(batch.entries.into_iter().map(|entry| TailItem { kind, entry }));
    }
    items
}

/// Reads the store on the blocking pool, one call per pull.
pub struct DirectTail {
    store: Arc<dyn EventStore>,
    keys: StreamKeys,
    count: usize,
    block: Duration,
}

impl DirectTail {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, keys: StreamKeys, config: &FeedConfig) -> Self {
        Self {
            store,
            keys,
            count: config.read_count,
            block: config.block_timeout(),
        }
    }
}

#[async_trait]
impl TailSource for DirectTail {
    async fn next(&mut self, session: &Session) -> TailEvent {
        let store = Arc::clone(&self.store);
        let connected = tokio::task::spawn_blocking(move || store.is_connected())
            .await
            .unwrap_or(false);
        if !connected {
            return TailEvent::Failed(FeedError::StoreUnavailable(PROBE_FAILED.into()));
        }

        let request = tail_request(
            &self.keys,
            session.cursor(StreamKind::Status),
            session.cursor(StreamKind::Log),
            self.count,
            self.block,
        );
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.tail_read(&request)).await {
            Ok(Ok(batches)) => {
                let items = tag(&self.keys, batches);
                if items.is_empty() {
                    TailEvent::Idle
                } else {
                    TailEvent::Batch(items)
                }
            }
            Ok(Err(err)) => TailEvent::Failed(err.into()),
            Err(err) => TailEvent::Failed(FeedError::StoreReadError(err.to_string())),
        }
    }

    async fn close(self: Box<Self>) {}
}

/// What the bridge worker hands to the live loop, one per read.
enum TailSignal {
    Batch(Vec<TailItem>),
    Idle,
    Failed(FeedError),
}

/// Blocking read loop run on the bridge worker.
///
/// Keeps its own read positions; the session's cursors stay with the
/// live loop.
struct StoreTail {
    store: Arc<dyn EventStore>,
    keys: StreamKeys,
    request: TailRequest,
    profile: Arc<FeedProfile>,
    task_id: String,
    policy: TerminalPolicy,
    unavailable_backoff: Duration,
    error_backoff: Duration,
    pause: Option<Duration>,
    done: bool,
}

impl StoreTail {
    fn advance(&mut self, key: &str, entries: &[RawEntry]) {
        let Some(last) = entries.last() else {
            return;
        };
        if let Some((_, cursor)) = self.request.streams.iter_mut().find(|(k, _)| k == key) {
            cursor.advance(&last.id);
        }
    }

    fn ends_feed(&self, entry: &RawEntry) -> bool {
        self.profile.owns(StreamKind::Status, entry, &self.task_id)
            && StatusRecord::parse(entry, &self.task_id)
                .is_ok_and(|record| self.policy.is_terminal(&record.status))
    }
}

impl BlockingSource for StoreTail {
    type Item = TailSignal;

    fn next_batch(&mut self, stop: &StopSignal) -> Option<Vec<TailSignal>> {
        if let Some(pause) = self.pause.take() {
            if stop.sleep(pause) {
                return None;
            }
        }
        // The live loop ends on the terminal status; read nothing past it.
        if self.done || stop.is_stopped() {
            return None;
        }

        if !self.store.is_connected() {
            self.pause = Some(self.unavailable_backoff);
            return Some(vec![TailSignal::Failed(FeedError::StoreUnavailable(
                PROBE_FAILED.into(),
            ))]);
        }

        match self.store.tail_read(&self.request) {
            Ok(batches) if batches.is_empty() => Some(vec![TailSignal::Idle]),
            Ok(batches) => {
                for batch in &batches {
                    self.advance(&batch.key, &batch.entries);
                }
                let items = tag(&self.keys, batches);
                self.done = items
                    .iter()
                    .any(|item| item.kind == StreamKind::Status && self.ends_feed(&item.entry));
                Some(vec![TailSignal::Batch(items)])
            }
            Err(err) => {
                self.pause = Some(self.error_backoff);
                Some(vec![TailSignal::Failed(err.into())])
            }
        }
    }
}

/// Reads the store on a dedicated worker thread through a bounded queue.
pub struct BridgedTail {
    bridge: Bridge<TailSignal>,
}

impl BridgedTail {
    /// Start the worker, reading after the session's current cursors.
    ///
    /// # Errors
    /// Returns `FeedError::BridgeFailed` if the worker thread cannot start.
    pub fn spawn(
        store: Arc<dyn EventStore>,
        profile: Arc<FeedProfile>,
        session: &Session,
        config: &FeedConfig,
    ) -> Result<Self, FeedError> {
        let keys = profile.keys_for(session.task_id());
        // Shorter blocking reads keep the worker responsive to stop.
        let block = config.block_timeout().min(config.bridge.poll_timeout());
        let request = tail_request(
            &keys,
            session.cursor(StreamKind::Status),
            session.cursor(StreamKind::Log),
            config.read_count,
            block,
        );
        let source = StoreTail {
            store,
            keys,
            request,
            task_id: session.task_id().to_string(),
            profile: Arc::clone(&profile),
            policy: config.terminal_policy(),
            unavailable_backoff: config.unavailable_backoff(),
            error_backoff: config.error_backoff(),
            pause: None,
            done: false,
        };

        let name = format!("{}-{}", profile.name, session.task_id());
        let bridge = Bridge::spawn(name, config.bridge.clone(), source)
            .map_err(|err| FeedError::BridgeFailed(err.to_string()))?;
        Ok(Self { bridge })
    }

    /// Signals waiting in the handoff queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.bridge.queued()
    }
}

#[async_trait]
impl TailSource for BridgedTail {
    async fn next(&mut self, _session: &Session) -> TailEvent {
        match self.bridge.recv().await {
            Received::Item(TailSignal::Batch(items)) => TailEvent::Batch(items),
            Received::Item(TailSignal::Idle) => TailEvent::Idle,
            Received::Idle => TailEvent::Waiting,
            Received::Item(TailSignal::Failed(err)) => TailEvent::Failed(err),
            Received::End(EndOfStream::Saturated) => TailEvent::Ended(FeedError::BridgeSaturated),
            Received::End(EndOfStream::Exhausted) => {
                TailEvent::Ended(FeedError::BridgeFailed("live reader stopped".into()))
            }
            Received::End(EndOfStream::WorkerLost) => {
                TailEvent::Ended(FeedError::BridgeFailed("live reader worker lost".into()))
            }
        }
    }

    async fn close(self: Box<Self>) {
        let outcome = self.bridge.shutdown().await;
        tracing::debug!(?outcome, "Live reader closed");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use task_feed_core::{Fields, MemoryEventStore, StoreConnector};

    use super::*;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    fn quick_config() -> FeedConfig {
        let mut config = FeedConfig {
            block_timeout_ms: 30,
            unavailable_backoff_ms: 5,
            error_backoff_ms: 5,
            ..FeedConfig::default()
        };
        config.bridge.poll_timeout_ms = 500;
        config
    }

    #[tokio::test]
    async fn test_direct_tail_tags_streams() {
        let store = MemoryEventStore::new();
        let profile = FeedProfile::agent_install();
        let keys = profile.keys_for("t1");
        store
            .append(&keys.status, fields(json!({"status": "running"})))
            .unwrap();
        store
            .append(&keys.log, fields(json!({"task_id": "t1", "message": "hi"})))
            .unwrap();

        let handle = store.connect().unwrap();
        let mut tail = DirectTail::new(handle, keys, &quick_config());
        let session = Session::new("t1", Cursor::Beginning);

        let TailEvent::Batch(items) = tail.next(&session).await else {
            panic!("expected a batch");
        };
        let kinds: Vec<_> = items.iter().map(|item| item.kind).collect();
        assert_eq!(kinds, vec![StreamKind::Status, StreamKind::Log]);
    }

    #[tokio::test]
    async fn test_direct_tail_idle_and_unavailable() {
        let store = MemoryEventStore::new();
        let keys = FeedProfile::agent_install().keys_for("t1");
        let mut tail = DirectTail::new(store.connect().unwrap(), keys, &quick_config());
        let session = Session::new("t1", Cursor::Beginning);

        assert!(matches!(tail.next(&session).await, TailEvent::Idle));

        store.set_connected(false);
        assert!(matches!(
            tail.next(&session).await,
            TailEvent::Failed(FeedError::StoreUnavailable(_))
        ));
        assert_eq!(store.tail_reads(), 1);
    }

    #[tokio::test]
    async fn test_bridged_tail_stops_reading_after_terminal_status() {
        let store = MemoryEventStore::new();
        let profile = Arc::new(FeedProfile::agent_install());
        let keys = profile.keys_for("t1");
        store
            .append(&keys.status, fields(json!({"status": "completed"})))
            .unwrap();

        let session = Session::new("t1", Cursor::Beginning);
        let mut tail = Box::new(
            BridgedTail::spawn(store.connect().unwrap(), profile, &session, &quick_config())
                .unwrap(),
        );

        let TailEvent::Batch(items) = tail.next(&session).await else {
            panic!("expected the terminal status");
        };
        assert_eq!(items[0].entry.text("status").as_deref(), Some("completed"));
        assert!(matches!(tail.next(&session).await, TailEvent::Ended(_)));
        assert_eq!(store.tail_reads(), 1);
        tail.close().await;
    }

    #[tokio::test]
    async fn test_bridged_tail_reports_failures() {
        let store = MemoryEventStore::new();
        store.fail_reads(1);
        let profile = Arc::new(FeedProfile::agent_install());
        let session = Session::new("t1", Cursor::Beginning);
        let mut tail = Box::new(
            BridgedTail::spawn(store.connect().unwrap(), profile, &session, &quick_config())
                .unwrap(),
        );

        assert!(matches!(
            tail.next(&session).await,
            TailEvent::Failed(FeedError::StoreReadError(_))
        ));
        tail.close().await;
    }
}
