//! Bridge blocking producers into cooperative async consumers.
//!
//! Provides:
//! - `Bridge` - Dedicated worker thread + bounded handoff queue
//! - `StopSignal` - Cooperative cancellation shared with the worker
//! - `BlockingSource` - What the worker repeatedly calls

pub mod bridge;
pub mod stop;

pub use bridge::{
    BlockingSource, Bridge, BridgeConfig, BridgeError, EndOfStream, Received, Shutdown,
};
pub use stop::StopSignal;
