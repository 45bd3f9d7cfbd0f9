//! Status values that end a feed.

use std::collections::BTreeSet;

/// Status tokens recognized as terminal by default, for every producer.
pub const DEFAULT_TERMINAL_STATUSES: [&str; 6] = [
    "completed",
    "completed_with_errors",
    "failed",
    "success",
    "error",
    "stopped",
];

/// Fixed set of lowercase terminal status tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalPolicy {
    statuses: BTreeSet<String>,
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINAL_STATUSES)
    }
}

impl TerminalPolicy {
    /// Build a policy from tokens; they are case-folded on the way in.
    #[must_use]
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            statuses: statuses
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether `status` ends the feed (case-insensitive).
    #[must_use]
    pub fn is_terminal(&self, status: &str) -> bool {
        self.statuses.contains(&status.trim().to_lowercase())
    }

    /// Iterate the tokens in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.statuses.iter().map(String::as_str)
    }
}
