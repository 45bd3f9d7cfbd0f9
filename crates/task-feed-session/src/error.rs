//! Feed error taxonomy.

use task_feed_core::{RecordError, StoreError};
use thiserror::Error;

/// Everything that can go wrong while serving a feed.
///
/// Store failures are retried under one consecutive-error budget per
/// session; the rest end the session (or, for malformed entries, are
/// skipped).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Event store read failed: {0}")]
    StoreReadError(String),
    #[error("Live reader saturated: the viewer is not keeping up")]
    BridgeSaturated,
    #[error("Live reader failed: {0}")]
    BridgeFailed(String),
    #[error("Not authorized to view task {0}")]
    AuthorizationDenied(String),
    #[error("Malformed entry: {0}")]
    MalformedEntry(String),
}

impl FeedError {
    /// Whether the error counts against the retry budget instead of
    /// ending the session outright.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::StoreReadError(_))
    }
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) | StoreError::Connect(msg) => Self::StoreUnavailable(msg),
            StoreError::Read(msg) => Self::StoreReadError(msg),
        }
    }
}

impl From<RecordError> for FeedError {
    fn from(err: RecordError) -> Self {
        Self::MalformedEntry(err.to_string())
    }
}
