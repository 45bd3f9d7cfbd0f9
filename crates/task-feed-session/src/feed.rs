//! Feed sessions: one spawned task per viewer connection.
//!
//! A session emits `connection_established`, replays recent history on a
//! fresh connection, then multiplexes the live log and status streams until
//! a terminal status, a fatal error, or the viewer going away.

use std::{
    ops::ControlFlow,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::Stream;
use task_feed_core::{
    Cursor, EventStore, FeedEvent, LogFilter, LogRecord, RawEntry, StatusRecord, StoreConnector,
    TerminalPolicy,
};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    FeedConfig, FeedError, FeedProfile, Phase, ReadMode, Session,
    profile::{StreamKeys, StreamKind},
    session::Attempt,
    tail::{BridgedTail, DirectTail, TailEvent, TailItem, TailSource},
};

/// What a viewer asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub task_id: String,
    /// `Cursor::Beginning` replays history; anything else resumes after it.
    pub resume: Cursor,
    pub filter: LogFilter,
}

impl FeedRequest {
    /// Fresh, unfiltered request.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            resume: Cursor::Beginning,
            filter: LogFilter::default(),
        }
    }

    #[must_use]
    pub fn resume(mut self, cursor: Cursor) -> Self {
        self.resume = cursor;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: LogFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// A terminal status was delivered.
    Completed,
    /// A fatal error was delivered as the last event.
    Failed(FeedError),
    /// The viewer went away.
    Closed,
}

/// Opens feed sessions for one profile.
#[derive(Clone)]
pub struct TaskFeed {
    profile: Arc<FeedProfile>,
    config: Arc<FeedConfig>,
    connector: Arc<dyn StoreConnector>,
}

impl TaskFeed {
    #[must_use]
    pub fn new(
        profile: FeedProfile,
        config: FeedConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            config: Arc::new(config),
            connector,
        }
    }

    #[must_use]
    pub fn profile(&self) -> &FeedProfile {
        &self.profile
    }

    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Start a session on the current runtime.
    ///
    /// Dropping the returned stream closes the session at its next
    /// suspension point.
    #[must_use]
    pub fn open(&self, request: FeedRequest) -> FeedStream {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let connection = Uuid::new_v4();
        let span = tracing::info_span!(
            "feed",
            profile = %self.profile.name,
            task_id = %request.task_id,
            %connection,
        );

        let runner = Runner {
            session: Session::new(request.task_id.clone(), request.resume),
            keys: self.profile.keys_for(&request.task_id),
            policy: self.config.terminal_policy(),
            profile: Arc::clone(&self.profile),
            config: Arc::clone(&self.config),
            filter: request.filter,
            sink: tx,
            last_heartbeat: Instant::now(),
        };
        let task = tokio::spawn(runner.run(Arc::clone(&self.connector)).instrument(span));

        FeedStream { events: rx, task }
    }
}

/// Events of one session, in emission order.
pub struct FeedStream {
    events: mpsc::Receiver<FeedEvent>,
    task: JoinHandle<FeedOutcome>,
}

impl FeedStream {
    /// Next event, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Stop listening and wait for the session to wind down.
    ///
    /// # Errors
    /// Returns error if the session task panicked or was cancelled.
    pub async fn join(self) -> Result<FeedOutcome, JoinError> {
        let Self { events, task } = self;
        drop(events);
        task.await
    }
}

impl Stream for FeedStream {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        self.events.poll_recv(cx)
    }
}

/// Open the session's own store handle.
async fn connect(connector: Arc<dyn StoreConnector>) -> Result<Arc<dyn EventStore>, FeedError> {
    tokio::task::spawn_blocking(move || connector.connect())
        .await
        .map_err(|err| FeedError::StoreUnavailable(err.to_string()))?
        .map_err(FeedError::from)
}

/// The viewer dropped its end of the event channel.
#[derive(Debug)]
pub(crate) struct Disconnected;

/// Drives one session. Owns every piece of mutable session state.
pub(crate) struct Runner {
    pub(crate) session: Session,
    pub(crate) profile: Arc<FeedProfile>,
    pub(crate) config: Arc<FeedConfig>,
    pub(crate) policy: TerminalPolicy,
    pub(crate) keys: StreamKeys,
    pub(crate) filter: LogFilter,
    pub(crate) sink: mpsc::Sender<FeedEvent>,
    pub(crate) last_heartbeat: Instant,
}

impl Runner {
    async fn run(mut self, connector: Arc<dyn StoreConnector>) -> FeedOutcome {
        tracing::info!("Feed session opened");
        let outcome = match self.drive(connector).await {
            Ok(outcome) => {
                self.session.enter(Phase::Terminal);
                outcome
            }
            Err(Disconnected) => {
                self.session.enter(Phase::Closed);
                FeedOutcome::Closed
            }
        };
        tracing::info!(?outcome, "Feed session ended");
        outcome
    }

    async fn drive(
        &mut self,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<FeedOutcome, Disconnected> {
        self.emit(FeedEvent::ConnectionEstablished {
            message: format!(
                "Connected to {} task {} progress feed",
                self.profile.name,
                self.session.task_id()
            ),
            task_id: self.session.task_id().to_string(),
            feed: self.profile.name.clone(),
            filters: self.filter.clone(),
        })
        .await?;

        let store = loop {
            match connect(Arc::clone(&connector)).await {
                Ok(store) => {
                    self.session.record_success();
                    break store;
                }
                Err(err) => {
                    if let ControlFlow::Break(outcome) = self.retry(err, "Connect").await? {
                        return Ok(outcome);
                    }
                }
            }
        };

        if self.session.needs_replay() {
            self.session.enter(Phase::Replay);
            self.replay(&store).await?;
            if self.session.is_finished() {
                tracing::info!("Task already finished, skipping live phase");
                return Ok(FeedOutcome::Completed);
            }
        }

        let mut tail: Box<dyn TailSource> = match self.config.read_mode {
            ReadMode::Direct => Box::new(DirectTail::new(store, self.keys.clone(), &self.config)),
            ReadMode::Bridged => {
                let profile = Arc::clone(&self.profile);
                match BridgedTail::spawn(store, profile, &self.session, &self.config) {
                    Ok(tail) => Box::new(tail),
                    Err(err) => return self.fail(err).await,
                }
            }
        };

        let outcome = self.live(tail.as_mut()).await;
        tail.close().await;
        outcome
    }

    async fn live(&mut self, tail: &mut dyn TailSource) -> Result<FeedOutcome, Disconnected> {
        self.session.enter(Phase::Live);
        self.last_heartbeat = Instant::now();

        loop {
            if self.session.is_finished() {
                return Ok(FeedOutcome::Completed);
            }

            let event = tokio::select! {
                () = self.sink.closed() => return Err(Disconnected),
                event = tail.next(&self.session) => event,
            };

            match event {
                TailEvent::Batch(items) => {
                    self.session.record_success();
                    for TailItem { kind, entry } in items {
                        self.accept(kind, &entry).await?;
                    }
                }
                TailEvent::Idle => {
                    self.session.record_success();
                    self.heartbeat().await?;
                }
                TailEvent::Waiting => self.heartbeat().await?,
                TailEvent::Failed(err) => {
                    if let ControlFlow::Break(outcome) = self.retry(err, "Live read").await? {
                        return Ok(outcome);
                    }
                }
                TailEvent::Ended(err) => return self.fail(err).await,
            }
        }
    }

    /// Count a transient failure against the budget: report it, then either
    /// back off or give up.
    async fn retry(
        &mut self,
        err: FeedError,
        what: &str,
    ) -> Result<ControlFlow<FeedOutcome>, Disconnected> {
        let max = self.config.max_consecutive_errors;
        match self.session.record_failure(max) {
            Attempt::Retry(attempt) => {
                tracing::warn!(error = %err, attempt, max, "{what} failed, retrying");
                self.emit(FeedEvent::error(format!("{err}, retrying ({attempt}/{max})")))
                    .await?;
                self.pause(self.backoff_for(&err)).await?;
                Ok(ControlFlow::Continue(()))
            }
            Attempt::GiveUp(attempt) => {
                tracing::error!(error = %err, attempt, "{what} failed too many times");
                self.emit(FeedEvent::error(format!(
                    "{err}, giving up after {attempt} consecutive failures"
                )))
                .await?;
                Ok(ControlFlow::Break(FeedOutcome::Failed(err)))
            }
        }
    }

    /// Emit a heartbeat unless one went out within the current window.
    async fn heartbeat(&mut self) -> Result<(), Disconnected> {
        if self.last_heartbeat.elapsed() >= self.config.heartbeat_interval() {
            self.emit(FeedEvent::heartbeat()).await?;
            self.last_heartbeat = Instant::now();
        }
        Ok(())
    }

    fn backoff_for(&self, err: &FeedError) -> Duration {
        match err {
            FeedError::StoreUnavailable(_) => self.config.unavailable_backoff(),
            _ => self.config.error_backoff(),
        }
    }

    /// Route one entry to its stream's handler. The cursor always advances,
    /// whether or not the entry is emitted.
    pub(crate) async fn accept(
        &mut self,
        kind: StreamKind,
        entry: &RawEntry,
    ) -> Result<(), Disconnected> {
        self.session.cursor_mut(kind).advance(&entry.id);
        if !self.profile.owns(kind, entry, self.session.task_id()) {
            return Ok(());
        }

        match kind {
            StreamKind::Status => self.accept_status(entry).await,
            StreamKind::Log => self.accept_log(entry).await,
        }
    }

    async fn accept_status(&mut self, entry: &RawEntry) -> Result<(), Disconnected> {
        let record = match StatusRecord::parse(entry, self.session.task_id()) {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!(error = %FeedError::from(err), "Skipping status entry");
                return Ok(());
            }
        };

        let terminal = self.policy.is_terminal(&record.status);
        if terminal {
            tracing::info!(status = %record.status, id = %record.id, "Terminal status reached");
        }
        self.emit(FeedEvent::Status(record)).await?;
        if terminal {
            self.session.finish();
        }
        Ok(())
    }

    async fn accept_log(&mut self, entry: &RawEntry) -> Result<(), Disconnected> {
        let record = LogRecord::normalize(entry, self.session.task_id());
        if !self.filter.accepts(&record) {
            return Ok(());
        }
        self.emit(FeedEvent::Log(record)).await
    }

    /// Emit a final error and end the session.
    async fn fail(&mut self, err: FeedError) -> Result<FeedOutcome, Disconnected> {
        tracing::error!(error = %err, "Feed session failed");
        self.emit(FeedEvent::error(err.to_string())).await?;
        Ok(FeedOutcome::Failed(err))
    }

    pub(crate) async fn emit(&self, event: FeedEvent) -> Result<(), Disconnected> {
        self.sink.send(event).await.map_err(|_| Disconnected)
    }

    async fn pause(&self, duration: Duration) -> Result<(), Disconnected> {
        tokio::select! {
            () = self.sink.closed() => Err(Disconnected),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
