//! In-memory event store.

use std::{
    collections::HashMap,
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use super::{EventStore, StoreConnector, StoreError, TailRequest};
use crate::{Fields, RawEntry, StreamBatch, StreamId};

/// Position key of an id in `<millis>-<seq>` form.
type IdKey = (u64, u64);

struct Stored {
    key: IdKey,
    entry: RawEntry,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Vec<Stored>>,
    last: IdKey,
}

struct Shared {
    state: Mutex<State>,
    appended: Condvar,
    connected: AtomicBool,
    failing_reads: AtomicUsize,
    tail_reads: AtomicUsize,
    range_reads: AtomicUsize,
}

/// In-memory append-only streams with blocking tail reads.
///
/// Ids are assigned from one process-wide sequence, so an id taken from
/// one stream is a valid resume point for every other stream.
/// Clones share the same streams; useful for development, tests and
/// single-process deployments. Data is lost on restart.
#[derive(Clone)]
pub struct MemoryEventStore {
    inner: Arc<Shared>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended: Condvar::new(),
                connected: AtomicBool::new(true),
                failing_reads: AtomicUsize::new(0),
                tail_reads: AtomicUsize::new(0),
                range_reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Append an entry to `key` and wake blocked readers.
    ///
    /// # Errors
    /// Returns error if the store lock is poisoned.
    pub fn append(&self, key: &str, fields: Fields) -> Result<StreamId, StoreError> {
        let mut state = self.lock()?;
        let now = now_millis();
        let next = if now > state.last.0 {
            (now, 0)
        } else {
            (state.last.0, state.last.1 + 1)
        };
        state.last = next;

        let id = StreamId::new(format!("{}-{}", next.0, next.1));
        state
            .streams
            .entry(key.to_string())
            .or_default()
            .push(Stored {
                key: next,
                entry: RawEntry::new(id.clone(), fields),
            });
        drop(state);

        self.inner.appended.notify_all();
        tracing::trace!(stream = key, %id, "Appended entry");
        Ok(id)
    }

    /// Number of entries in `key`.
    #[must_use]
    pub fn len(&self, key: &str) -> usize {
        self.lock()
            .map(|s| s.streams.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Whether `key` holds no entries.
    #[must_use]
    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Toggle the liveness probe; while disconnected reads fail too.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `n` tail reads fail.
    pub fn fail_reads(&self, n: usize) {
        self.inner.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Tail reads issued so far, failed ones included.
    #[must_use]
    pub fn tail_reads(&self) -> usize {
        self.inner.tail_reads.load(Ordering::SeqCst)
    }

    /// Range reads issued so far.
    #[must_use]
    pub fn range_reads(&self) -> usize {
        self.inner.range_reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.inner
            .state
            .lock()
            .map_err(|e| StoreError::Read(e.to_string()))
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store disconnected".into()))
        }
    }
}

impl EventStore for MemoryEventStore {
    fn range_read(&self, key: &str, count: usize) -> Result<Vec<RawEntry>, StoreError> {
        self.inner.range_reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        let state = self.lock()?;
        Ok(state
            .streams
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(count)
                    .map(|s| s.entry.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn tail_read(&self, request: &TailRequest) -> Result<Vec<StreamBatch>, StoreError> {
        self.inner.tail_reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if self.take_injected_failure() {
            return Err(StoreError::Read("injected read failure".into()));
        }

        let positions = request
            .streams
            .iter()
            .map(|(key, cursor)| Ok((key.as_str(), parse_id(cursor.as_token())?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let deadline = Instant::now() + request.block;
        let mut state = self.lock()?;
        loop {
            let batches = collect_after(&state, &positions, request.count);
            if !batches.is_empty() {
                return Ok(batches);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            state = self
                .inner
                .appended
                .wait_timeout(state, deadline - now)
                .map_err(|e| StoreError::Read(e.to_string()))?
                .0;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryEventStore {
    fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError> {
        Ok(Arc::new(self.clone()))
    }
}

fn collect_after(state: &State, positions: &[(&str, IdKey)], count: usize) -> Vec<StreamBatch> {
    positions
        .iter()
        .filter_map(|(key, after)| {
            let entries: Vec<RawEntry> = state
                .streams
                .get(*key)?
                .iter()
                .filter(|s| s.key > *after)
                .take(count)
                .map(|s| s.entry.clone())
                .collect();
            (!entries.is_empty()).then(|| StreamBatch {
                key: (*key).to_string(),
                entries,
            })
        })
        .collect()
}

fn parse_id(token: &str) -> Result<IdKey, StoreError> {
    let invalid = || StoreError::Read(format!("invalid stream id: {token}"));
    let (ms, seq) = token.split_once('-').unwrap_or((token, "0"));
    Ok((
        ms.parse().map_err(|_| invalid())?,
        seq.parse().map_err(|_| invalid())?,
    ))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
