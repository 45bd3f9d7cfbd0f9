//! Feed profiles: where a task's streams live and how entries name their task.

use serde::{Deserialize, Serialize};
use task_feed_core::RawEntry;

/// Which of the two multiplexed streams an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Log,
    Status,
}

/// Physical shape of one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum StreamLayout {
    /// One stream per task, keyed `prefix + task_id`.
    PerTask { prefix: String },
    /// One stream shared by every task; entries carry their task id.
    Shared { key: String },
}

impl StreamLayout {
    #[must_use]
    pub fn per_task(prefix: impl Into<String>) -> Self {
        Self::PerTask {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn shared(key: impl Into<String>) -> Self {
        Self::Shared { key: key.into() }
    }

    /// Store key holding `task_id`'s entries.
    #[must_use]
    pub fn key_for(&self, task_id: &str) -> String {
        match self {
            Self::PerTask { prefix } => format!("{prefix}{task_id}"),
            Self::Shared { key } => key.clone(),
        }
    }

    /// Whether entries must be filtered by task id.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

/// Resolved store keys for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKeys {
    pub log: String,
    pub status: String,
}

impl StreamKeys {
    #[must_use]
    pub fn key(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Log => &self.log,
            StreamKind::Status => &self.status,
        }
    }

    /// Which stream a store key belongs to.
    #[must_use]
    pub fn kind_of(&self, key: &str) -> Option<StreamKind> {
        if key == self.status {
            Some(StreamKind::Status)
        } else if key == self.log {
            Some(StreamKind::Log)
        } else {
            None
        }
    }
}

/// Parameterizes one kind of task feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedProfile {
    /// Short name used in logs and the connect message.
    pub name: String,
    pub status: StreamLayout,
    pub log: StreamLayout,
    /// Entry fields naming the owning task, tried in order.
    pub task_id_fields: Vec<String>,
}

impl FeedProfile {
    /// Agent installation progress.
    #[must_use]
    pub fn agent_install() -> Self {
        Self {
            name: "install".into(),
            status: StreamLayout::per_task("agent_install_status:"),
            log: StreamLayout::shared("agent_install_logs"),
            task_id_fields: vec!["task_id".into(), "execution_id".into()],
        }
    }

    /// Agent removal progress; producers write to the install streams.
    #[must_use]
    pub fn agent_uninstall() -> Self {
        Self {
            name: "uninstall".into(),
            ..Self::agent_install()
        }
    }

    /// Job execution logs and progress.
    #[must_use]
    pub fn job_execution() -> Self {
        Self {
            name: "job".into(),
            status: StreamLayout::shared("agent_results"),
            log: StreamLayout::shared("job_logs"),
            task_id_fields: vec!["execution_id".into()],
        }
    }

    #[must_use]
    pub fn keys_for(&self, task_id: &str) -> StreamKeys {
        StreamKeys {
            log: self.log.key_for(task_id),
            status: self.status.key_for(task_id),
        }
    }

    #[must_use]
    pub const fn layout(&self, kind: StreamKind) -> &StreamLayout {
        match kind {
            StreamKind::Log => &self.log,
            StreamKind::Status => &self.status,
        }
    }

    /// Task id an entry declares, if any.
    #[must_use]
    pub fn task_id_of(&self, entry: &RawEntry) -> Option<String> {
        self.task_id_fields
            .iter()
            .find_map(|field| entry.text(field))
    }

    /// Whether an entry read from `kind`'s stream belongs to `task_id`.
    ///
    /// Per-task streams trust their key; shared streams need a match.
    #[must_use]
    pub fn owns(&self, kind: StreamKind, entry: &RawEntry, task_id: &str) -> bool {
        !self.layout(kind).is_shared() || self.task_id_of(entry).as_deref() == Some(task_id)
    }
}
