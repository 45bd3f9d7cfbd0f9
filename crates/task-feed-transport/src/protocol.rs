//! Query parameters of a feed request.

use serde::{Deserialize, Serialize};
use task_feed_core::{Cursor, LogFilter};
use task_feed_session::FeedRequest;

/// `?last_id=&host_id=&step_id=`. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Resume point; absent or `0` replays history.
    #[serde(default)]
    pub last_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl FeedQuery {
    /// Build the session request for `task_id`.
    #[must_use]
    pub fn into_request(self, task_id: impl Into<String>) -> FeedRequest {
        let resume = self
            .last_id
            .as_deref()
            .map_or(Cursor::Beginning, Cursor::parse);
        FeedRequest::new(task_id).resume(resume).filter(LogFilter {
            host_id: present(self.host_id),
            step_id: present(self.step_id),
        })
    }
}
