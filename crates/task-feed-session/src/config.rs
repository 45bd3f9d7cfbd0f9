//! Feed tuning knobs.
//!
//! Every field has a serde default, so a partial config file (or none at
//! all) yields a working feed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use task_feed_bridge::BridgeConfig;
use task_feed_core::{TerminalPolicy, terminal::DEFAULT_TERMINAL_STATUSES};

/// How the live phase reaches the blocking store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Each read runs on the runtime's blocking pool.
    Direct,
    /// A dedicated worker thread reads continuously into a bounded queue.
    #[default]
    Bridged,
}

/// Per-session feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Status entries replayed on a fresh connection.
    ///
    /// With `0` on either stream nothing is replayed and live reads start
    /// after that stream's newest entry, so a task that already finished
    /// is only noticed if a further status arrives.
    #[serde(default = "default_status_replay_count")]
    pub status_replay_count: usize,
    /// Log entries replayed on a fresh connection.
    #[serde(default = "default_log_replay_count")]
    pub log_replay_count: usize,
    /// Upper bound on entries per stream per live read.
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    /// How long one live read waits for new entries.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Consecutive failures that end a session.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Pause after a failed connectivity probe.
    #[serde(default = "default_unavailable_backoff_ms")]
    pub unavailable_backoff_ms: u64,
    /// Pause after a failed read.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Tolerance when deciding a heartbeat window has elapsed.
    #[serde(default = "default_heartbeat_slack_ms")]
    pub heartbeat_slack_ms: u64,
    /// Events buffered towards a slow viewer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub read_mode: ReadMode,
    /// Status values that end a feed.
    #[serde(default = "default_terminal_statuses")]
    pub terminal_statuses: Vec<String>,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            status_replay_count: default_status_replay_count(),
            log_replay_count: default_log_replay_count(),
            read_count: default_read_count(),
            block_timeout_ms: default_block_timeout_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            unavailable_backoff_ms: default_unavailable_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            heartbeat_slack_ms: default_heartbeat_slack_ms(),
            event_buffer: default_event_buffer(),
            read_mode: ReadMode::default(),
            terminal_statuses: default_terminal_statuses(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub const fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    #[must_use]
    pub const fn unavailable_backoff(&self) -> Duration {
        Duration::from_millis(self.unavailable_backoff_ms)
    }

    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Minimum spacing between two heartbeats.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms.saturating_sub(self.heartbeat_slack_ms))
    }

    #[must_use]
    pub fn terminal_policy(&self) -> TerminalPolicy {
        TerminalPolicy::new(&self.terminal_statuses)
    }
}

const fn default_status_replay_count() -> usize {
    20
}
const fn default_log_replay_count() -> usize {
    50
}
const fn default_read_count() -> usize {
    200
}
const fn default_block_timeout_ms() -> u64 {
    2000
}
const fn default_max_consecutive_errors() -> u32 {
    5
}
const fn default_unavailable_backoff_ms() -> u64 {
    2000
}
const fn default_error_backoff_ms() -> u64 {
    1000
}
const fn default_heartbeat_slack_ms() -> u64 {
    200
}
const fn default_event_buffer() -> usize {
    64
}
fn default_terminal_statuses() -> Vec<String> {
    DEFAULT_TERMINAL_STATUSES.iter().map(ToString::to_string).collect()
}
