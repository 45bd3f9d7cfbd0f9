//! Server-sent event frames.

use std::fmt::Write as _;

use task_feed_core::FeedEvent;

/// Value of the `Content-Type` header of a feed response.
pub const CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/// SSE `event:` name for a feed event.
#[must_use]
pub const fn event_name(event: &FeedEvent) -> &'static str {
    match event {
        FeedEvent::Heartbeat { .. } => "heartbeat",
        _ => "message",
    }
}

/// Encode one event as an SSE frame.
///
/// The `id:` line is present only for store-backed events. The JSON body is
/// a single line and keeps non-ASCII text as is.
///
/// # Errors
/// Returns error if the event cannot be serialized.
pub fn encode(event: &FeedEvent) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    let mut frame = String::with_capacity(data.len() + 64);
    if let Some(id) = event.id() {
        let _ = writeln!(frame, "id: {id}");
    }
    let _ = writeln!(frame, "event: {}", event_name(event));
    let _ = write!(frame, "data: {data}\n\n");
    Ok(frame)
}
