//! The event store contract.
//!
//! The store itself lives outside this workspace; the feed only consumes
//! this shape. Every method may block the calling thread.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{Cursor, RawEntry, StreamBatch};

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryEventStore;

/// Store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store read failed: {0}")]
    Read(String),
    #[error("Store connect failed: {0}")]
    Connect(String),
}

/// One blocking multi-stream tail read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRequest {
    /// Stream key and the position to read strictly after.
    pub streams: Vec<(String, Cursor)>,
    /// Upper bound on entries returned per stream.
    pub count: usize,
    /// How long to wait when nothing new exists yet.
    pub block: Duration,
}

/// Blocking, synchronous access to append-only streams.
pub trait EventStore: Send + Sync {
    /// Most recent entries of `key`, newest first, at most `count`.
    ///
    /// # Errors
    /// Returns error if the store cannot be read.
    fn range_read(&self, key: &str, count: usize) -> Result<Vec<RawEntry>, StoreError>;

    /// Entries after each cursor, oldest first per stream.
    ///
    /// Blocks up to `request.block` when nothing new exists and returns an
    /// empty list on timeout. Streams without new entries are omitted.
    ///
    /// # Errors
    /// Returns error if the store cannot be read.
    fn tail_read(&self, request: &TailRequest) -> Result<Vec<StreamBatch>, StoreError>;

    /// Cheap liveness probe.
    fn is_connected(&self) -> bool;
}

/// Opens one store handle per feed session.
pub trait StoreConnector: Send + Sync {
    /// Open a handle owned by a single session.
    ///
    /// # Errors
    /// Returns error if no handle can be opened.
    fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError>;
}

impl<F> StoreConnector for F
where
    F: Fn() -> Result<Arc<dyn EventStore>, StoreError> + Send + Sync,
{
    fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError> {
        self()
    }
}
