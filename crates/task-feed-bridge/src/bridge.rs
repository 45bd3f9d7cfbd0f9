//! Dedicated worker thread feeding a bounded handoff queue.
//!
//! The worker repeatedly calls a blocking source and pushes what it gets
//! into a bounded queue; the async consumer awaits the queue with a short
//! timeout. End of stream travels as a sentinel on the queue, never as a
//! closed channel.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

use crate::StopSignal;

/// Pause between attempts to enqueue into a full queue.
const ENQUEUE_RETRY: Duration = Duration::from_millis(5);

/// Bridge tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Maximum items waiting in the handoff queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long the consumer waits for an item before reporting idleness.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long shutdown waits for the worker before abandoning it.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// How long one enqueue attempt may wait on a full queue.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Consecutive failed enqueue attempts before the worker gives up.
    #[serde(default = "default_max_enqueue_failures")]
    pub max_enqueue_failures: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            max_enqueue_failures: default_max_enqueue_failures(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub const fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

const fn default_queue_capacity() -> usize {
    1000
}
const fn default_poll_timeout_ms() -> u64 {
    1000
}
const fn default_join_timeout_ms() -> u64 {
    2000
}
const fn default_enqueue_timeout_ms() -> u64 {
    500
}
const fn default_max_enqueue_failures() -> u32 {
    3
}

/// Bridge error.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to spawn bridge worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Why the worker stopped producing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOfStream {
    /// The source reported it has nothing more to give.
    Exhausted,
    /// The queue stayed full past the failure threshold.
    Saturated,
    /// The worker vanished without a sentinel (it panicked).
    WorkerLost,
}

/// Blocking producer driven by the bridge worker.
pub trait BlockingSource: Send + 'static {
    type Item: Send + 'static;

    /// Run one blocking cycle.
    ///
    /// Implementations should bound how long they block and consult `stop`
    /// while waiting. Returning `None` ends the stream.
    fn next_batch(&mut self, stop: &StopSignal) -> Option<Vec<Self::Item>>;
}

/// What the consumer got from one `Bridge::recv`.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Item(T),
    /// Nothing arrived within the poll timeout.
    Idle,
    End(EndOfStream),
}

/// How shutdown went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Joined,
    /// The worker did not exit in time and was left detached.
    Abandoned,
    Panicked,
}

enum Handoff<T> {
    Item(T),
    End(EndOfStream),
}

/// Consumer side of a bridge.
///
/// Dropping it signals the worker to stop without waiting for it; prefer
/// `shutdown` for a bounded join.
pub struct Bridge<T> {
    name: String,
    rx: mpsc::Receiver<Handoff<T>>,
    stop: StopSignal,
    worker: Option<thread::JoinHandle<()>>,
    exited: Option<oneshot::Receiver<()>>,
    ended: Option<EndOfStream>,
    config: BridgeConfig,
}

impl<T: Send + 'static> Bridge<T> {
    /// Start a worker thread driving `source`.
    ///
    /// # Errors
    /// Returns error if the OS refuses to spawn the thread.
    pub fn spawn<S>(
        name: impl Into<String>,
        config: BridgeConfig,
        source: S,
    ) -> Result<Self, BridgeError>
    where
        S: BlockingSource<Item = T>,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (exit_tx, exit_rx) = oneshot::channel();
        let stop = StopSignal::new();

        let worker = Worker {
            name: name.clone(),
            source,
            tx,
            stop: stop.clone(),
            config: config.clone(),
            failures: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("bridge-{name}"))
            .spawn(move || {
                let _exit = ExitGuard(Some(exit_tx));
                worker.run();
            })?;

        tracing::debug!(bridge = %name, capacity = config.queue_capacity, "Bridge worker spawned");

        Ok(Self {
            name,
            rx,
            stop,
            worker: Some(handle),
            exited: Some(exit_rx),
            ended: None,
            config,
        })
    }

    /// Await the next item for at most the poll timeout.
    ///
    /// Once an end of stream was seen it is returned on every later call.
    pub async fn recv(&mut self) -> Received<T> {
        if let Some(end) = &self.ended {
            return Received::End(end.clone());
        }

        match tokio::time::timeout(self.config.poll_timeout(), self.rx.recv()).await {
            Err(_) => Received::Idle,
            Ok(Some(Handoff::Item(item))) => Received::Item(item),
            Ok(Some(Handoff::End(end))) => {
                tracing::debug!(bridge = %self.name, ?end, "Bridge reached end of stream");
                self.ended = Some(end.clone());
                Received::End(end)
            }
            Ok(None) => {
                tracing::warn!(bridge = %self.name, "Bridge worker vanished without a sentinel");
                self.ended = Some(EndOfStream::WorkerLost);
                Received::End(EndOfStream::WorkerLost)
            }
        }
    }

    /// Items currently waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Handle to the stop signal the worker observes.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Stop the worker and join it, waiting at most the join timeout.
    pub async fn shutdown(mut self) -> Shutdown {
        self.stop.stop();
        self.rx.close();

        let Some(handle) = self.worker.take() else {
            return Shutdown::Joined;
        };

        if let Some(exited) = self.exited.take() {
            if tokio::time::timeout(self.config.join_timeout(), exited)
                .await
                .is_err()
            {
                tracing::warn!(
                    bridge = %self.name,
                    timeout_ms = self.config.join_timeout_ms,
                    "Bridge worker did not exit in time, abandoning it"
                );
                return Shutdown::Abandoned;
            }
        }

        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {
                tracing::debug!(bridge = %self.name, "Bridge worker joined");
                Shutdown::Joined
            }
            _ => {
                tracing::error!(bridge = %self.name, "Bridge worker panicked");
                Shutdown::Panicked
            }
        }
    }
}

impl<T> Drop for Bridge<T> {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Fires the exit notification however the worker thread ends.
struct ExitGuard(Option<oneshot::Sender<()>>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

enum Refused {
    Stopped,
    Closed,
    Saturated,
}

struct Worker<S: BlockingSource> {
    name: String,
    source: S,
    tx: mpsc::Sender<Handoff<S::Item>>,
    stop: StopSignal,
    config: BridgeConfig,
    failures: u32,
}

impl<S: BlockingSource> Worker<S> {
    fn run(mut self) {
        tracing::debug!(bridge = %self.name, "Bridge worker started");

        let end = loop {
            if self.stop.is_stopped() {
                tracing::debug!(bridge = %self.name, "Bridge worker stopping");
                return;
            }

            let Some(batch) = self.source.next_batch(&self.stop) else {
                break EndOfStream::Exhausted;
            };

            match self.offer_all(batch) {
                Ok(()) => {}
                Err(Refused::Stopped | Refused::Closed) => return,
                Err(Refused::Saturated) => break EndOfStream::Saturated,
            }
        };

        self.deliver_end(end);
    }

    fn offer_all(&mut self, batch: Vec<S::Item>) -> Result<(), Refused> {
        for item in batch {
            self.offer(Handoff::Item(item))?;
        }
        Ok(())
    }

    fn offer(&mut self, mut msg: Handoff<S::Item>) -> Result<(), Refused> {
        loop {
            let deadline = Instant::now() + self.config.enqueue_timeout();
            loop {
                match self.tx.try_send(msg) {
                    Ok(()) => {
                        self.failures = 0;
                        return Ok(());
                    }
                    Err(TrySendError::Closed(_)) => return Err(Refused::Closed),
                    Err(TrySendError::Full(back)) => msg = back,
                }
                if Instant::now() >= deadline {
                    break;
                }
                if self.stop.sleep(ENQUEUE_RETRY) {
                    return Err(Refused::Stopped);
                }
            }

            self.failures += 1;
            tracing::warn!(
                bridge = %self.name,
                failures = self.failures,
                max = self.config.max_enqueue_failures,
                "Handoff queue full"
            );
            if self.failures >= self.config.max_enqueue_failures {
                return Err(Refused::Saturated);
            }
        }
    }

    /// Place the sentinel, waiting for room until the consumer goes away.
    fn deliver_end(&self, end: EndOfStream) {
        tracing::debug!(bridge = %self.name, ?end, "Bridge worker finished");
        let mut msg = Handoff::End(end);
        loop {
            match self.tx.try_send(msg) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(back)) => msg = back,
            }
            if self.stop.sleep(ENQUEUE_RETRY) {
                return;
            }
        }
    }
}
