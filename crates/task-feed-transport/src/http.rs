//! Axum surface: one SSE endpoint per feed profile.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, future};
use task_feed_core::FeedEvent;
use task_feed_session::{FeedError, FeedStream, TaskFeed};
use tower_http::trace::TraceLayer;

use crate::{Authorizer, FeedQuery, VIEWER_HEADER, Viewer, sse};

fn stream_headers() -> [(HeaderName, &'static str); 5] {
    [
        (header::CONTENT_TYPE, sse::CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
        // Keeps nginx from buffering the stream.
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ]
}

/// State of one mounted feed endpoint.
#[derive(Clone)]
pub struct FeedState {
    pub feed: TaskFeed,
    pub authorizer: Arc<dyn Authorizer>,
}

/// `GET <route>/{task_id}?last_id=&host_id=&step_id=`
///
/// Answers 403 without opening a session when the viewer may not watch the
/// task. Otherwise streams the session until it ends or the client leaves;
/// dropping the body closes the session.
pub async fn feed_handler(
    State(state): State<FeedState>,
    Path(task_id): Path<String>,
    Query(query): Query<FeedQuery>,
    headers: HeaderMap,
) -> Response {
    let viewer = Viewer::from_header(
        headers
            .get(VIEWER_HEADER)
            .and_then(|value| value.to_str().ok()),
    );

    if !state.authorizer.can_view(&viewer, &task_id).await {
        let err = FeedError::AuthorizationDenied(task_id);
        tracing::warn!(viewer = ?viewer.name(), error = %err, "Feed request denied");
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }

    tracing::debug!(
        viewer = ?viewer.name(),
        %task_id,
        feed = %state.feed.profile().name,
        "Opening feed"
    );
    let stream = state.feed.open(query.into_request(task_id));
    (stream_headers(), Body::from_stream(frames(stream))).into_response()
}

fn frames(stream: FeedStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    stream.filter_map(|event| future::ready(frame(&event).map(Ok)))
}

fn frame(event: &FeedEvent) -> Option<Bytes> {
    match sse::encode(event) {
        Ok(frame) => Some(Bytes::from(frame)),
        Err(err) => {
            tracing::error!(error = %err, kind = event.kind(), "Dropping unencodable event");
            None
        }
    }
}

/// Builds a router serving several feed profiles side by side.
pub struct FeedRoutes {
    router: Router,
    authorizer: Arc<dyn Authorizer>,
}

impl FeedRoutes {
    /// Routes guarded by `authorizer` unless mounted with their own.
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            router: Router::new(),
            authorizer,
        }
    }

    /// Serve `feed` at `<prefix>/{task_id}`.
    #[must_use]
    pub fn mount(self, prefix: &str, feed: TaskFeed) -> Self {
        let authorizer = Arc::clone(&self.authorizer);
        self.mount_with(prefix, feed, authorizer)
    }

    /// Serve `feed` at `<prefix>/{task_id}` behind a dedicated authorizer.
    #[must_use]
    pub fn mount_with(
        mut self,
        prefix: &str,
        feed: TaskFeed,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let path = format!("{}/{{task_id}}", prefix.trim_end_matches('/'));
        tracing::debug!(%path, feed = %feed.profile().name, "Mounting feed");
        let state = FeedState { feed, authorizer };
        self.router = self.router.route(&path, get(feed_handler).with_state(state));
        self
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router.layer(TraceLayer::new_for_http())
    }
}
