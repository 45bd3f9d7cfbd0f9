//! Resumable live feed sessions over log and status streams.
//!
//! Provides:
//! - `TaskFeed` - Opens one feed session per viewer connection
//! - `FeedProfile` - Where a task's streams live and how entries name their task
//! - `FeedConfig` - Replay sizes, timeouts, error cap and read mode
//! - Tail sources reading the store directly or through a bridge worker

pub mod config;
pub mod error;
pub mod feed;
pub mod profile;
mod replay;
pub mod session;
pub mod tail;

pub use config::{FeedConfig, ReadMode};
pub use error::FeedError;
pub use feed::{FeedOutcome, FeedRequest, FeedStream, TaskFeed};
pub use profile::{FeedProfile, StreamKeys, StreamKind, StreamLayout};
pub use session::{Attempt, Phase, Session};
pub use tail::{BridgedTail, DirectTail, TailEvent, TailItem, TailSource};
