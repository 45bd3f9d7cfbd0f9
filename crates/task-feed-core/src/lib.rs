//! Core abstractions for live task event feeds.
//!
//! This crate provides the fundamental building blocks:
//! - `Cursor` / `StreamId` - Opaque positions within a stream
//! - `RawEntry` - Entries as the store hands them out
//! - `LogRecord` / `StatusRecord` - Normalized entries ready for viewers
//! - `FeedEvent` - Typed events pushed to a viewer
//! - `TerminalPolicy` - Status values that end a feed
//! - `EventStore` / `StoreConnector` - The blocking store contract

pub mod cursor;
pub mod entry;
pub mod event;
pub mod record;
pub mod store;
pub mod terminal;

pub use cursor::{Cursor, StreamId};
pub use entry::{Fields, RawEntry, StreamBatch};
pub use event::{FeedEvent, LogFilter};
pub use record::{LogRecord, RecordError, StatusRecord};
pub use store::{EventStore, StoreConnector, StoreError, TailRequest};
pub use terminal::TerminalPolicy;

#[cfg(feature = "memory")]
pub use store::MemoryEventStore;
