//! Cooperative stop signal shared between a worker thread and its consumer.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Longest uninterrupted nap taken by `StopSignal::sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Stop flag usable from both blocking threads and async tasks.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to stop. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Block the current thread for up to `duration`, waking early on stop.
    ///
    /// Returns `true` if the signal fired.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Resolve once the signal fires.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// Signal that fires with this one but can also be stopped on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
