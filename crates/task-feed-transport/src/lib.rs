//! SSE wire format and HTTP surface for task feeds.
//!
//! Provides:
//! - Query protocol (`last_id`, `host_id`, `step_id`)
//! - SSE frame encoder
//! - `Authorizer` - Who may watch which task
//! - Axum handler and router (feature: http)

pub mod auth;
pub mod protocol;
pub mod sse;

#[cfg(feature = "http")]
pub mod http;

pub use auth::{AllowAll, AllowList, Authorizer, VIEWER_HEADER, Viewer};
pub use protocol::FeedQuery;
pub use sse::{CONTENT_TYPE, encode, event_name};

#[cfg(feature = "http")]
pub use http::{FeedRoutes, FeedState, feed_handler};
