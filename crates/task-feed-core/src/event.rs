//! Events pushed to a viewer.

use serde::{Deserialize, Serialize};

use crate::{LogRecord, StatusRecord, StreamId};

/// Active viewer-side log filters, echoed on connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub host_id: Option<String>,
    pub step_id: Option<String>,
}

impl LogFilter {
    /// Whether a normalized record passes the filter.
    #[must_use]
    pub fn accepts(&self, record: &LogRecord) -> bool {
        self.host_id.as_ref().is_none_or(|h| *h == record.host_id)
            && self.step_id.as_ref().is_none_or(|s| *s == record.step_id)
    }
}

/// One event of a task feed.
///
/// Serialized with a `type` discriminator; record fields are flattened
/// next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// First event of every feed.
    ConnectionEstablished {
        message: String,
        task_id: String,
        feed: String,
        filters: LogFilter,
    },
    /// A normalized log line.
    Log(LogRecord),
    /// A status transition.
    Status(StatusRecord),
    /// Keep-alive during idleness, carrying server time.
    Heartbeat { timestamp: String },
    /// Retried or fatal failure, human readable.
    Error { message: String },
}

impl FeedEvent {
    /// Heartbeat stamped with the current server time.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Error event with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Store id of the underlying entry, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&StreamId> {
        match self {
            Self::Log(rec) => Some(&rec.id),
            Self::Status(rec) => Some(&rec.id),
            _ => None,
        }
    }

    /// Value of the `type` discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::Log(_) => "log",
            Self::Status(_) => "status",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
        }
    }
}
