//! Per-connection session state.
//!
//! The live loop owns a `Session` exclusively: cursors, the terminal flag
//! and the error counter are never touched by the bridge worker.

use task_feed_core::Cursor;

use crate::profile::StreamKind;

/// Lifecycle of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Replay,
    Live,
    /// A terminal status was seen or a fatal error ended the feed.
    Terminal,
    /// The viewer went away.
    Closed,
}

impl Phase {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Terminal | Self::Closed)
    }
}

/// Outcome of counting one failure against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Budget left; back off and try again.
    Retry(u32),
    /// The cap was reached.
    GiveUp(u32),
}

/// Mutable state of one feed session.
#[derive(Debug, Clone)]
pub struct Session {
    task_id: String,
    log_cursor: Cursor,
    status_cursor: Cursor,
    finished: bool,
    consecutive_errors: u32,
    phase: Phase,
}

impl Session {
    /// New session; `resume` seeds both cursors.
    #[must_use]
    pub fn new(task_id: impl Into<String>, resume: Cursor) -> Self {
        Self {
            task_id: task_id.into(),
            log_cursor: resume.clone(),
            status_cursor: resume,
            finished: false,
            consecutive_errors: 0,
            phase: Phase::Connecting,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub const fn cursor(&self, kind: StreamKind) -> &Cursor {
        match kind {
            StreamKind::Log => &self.log_cursor,
            StreamKind::Status => &self.status_cursor,
        }
    }

    pub const fn cursor_mut(&mut self, kind: StreamKind) -> &mut Cursor {
        match kind {
            StreamKind::Log => &mut self.log_cursor,
            StreamKind::Status => &mut self.status_cursor,
        }
    }

    /// History is replayed only on a fresh connection.
    #[must_use]
    pub const fn needs_replay(&self) -> bool {
        self.log_cursor.is_beginning() && self.status_cursor.is_beginning()
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark that a terminal status was seen.
    pub const fn finish(&mut self) {
        self.finished = true;
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Move to `next`. Final phases are sticky.
    pub fn enter(&mut self, next: Phase) {
        if self.phase.is_final() || self.phase == next {
            return;
        }
        tracing::debug!(
            task_id = %self.task_id,
            from = ?self.phase,
            to = ?next,
            "Feed phase change"
        );
        self.phase = next;
    }

    /// Count one failure against a budget of `max`.
    pub const fn record_failure(&mut self, max: u32) -> Attempt {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= max {
            Attempt::GiveUp(self.consecutive_errors)
        } else {
            Attempt::Retry(self.consecutive_errors)
        }
    }

    pub const fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }
}
