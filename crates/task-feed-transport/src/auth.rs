//! Viewer authorization.

use std::collections::HashSet;

use async_trait::async_trait;

/// Header carrying the viewer identity, set by an upstream proxy.
pub const VIEWER_HEADER: &str = "x-feed-viewer";

/// Who is asking to watch a feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Viewer {
    Anonymous,
    Named(String),
}

impl Viewer {
    /// Identity from the viewer header value, if any.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(name) if !name.is_empty() => Self::Named(name.to_string()),
            _ => Self::Anonymous,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Named(name) => Some(name),
        }
    }
}

/// Decides whether a viewer may watch a task's feed.
///
/// Consulted once per connection, before any session is opened.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_view(&self, viewer: &Viewer, task_id: &str) -> bool;
}

/// Lets everyone watch everything.
#[derive(Debug, Default, Clone)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn can_view(&self, _viewer: &Viewer, _task_id: &str) -> bool {
        true
    }
}

/// Lets a fixed set of named viewers watch every task.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    viewers: HashSet<String>,
}

impl AllowList {
    #[must_use]
    pub fn new<I, S>(viewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            viewers: viewers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Authorizer for AllowList {
    async fn can_view(&self, viewer: &Viewer, _task_id: &str) -> bool {
        viewer.name().is_some_and(|name| self.viewers.contains(name))
    }
}
