//! Historical replay for fresh connections.

use std::sync::Arc;

use task_feed_core::{EventStore, RawEntry};

use crate::{
    feed::{Disconnected, Runner},
    profile::StreamKind,
};

impl Runner {
    /// Emit recent history, status stream first, each stream oldest first.
    ///
    /// A stream whose history cannot be read is skipped and its cursor left
    /// alone; the live phase picks up from there.
    pub(crate) async fn replay(
        &mut self,
        store: &Arc<dyn EventStore>,
    ) -> Result<(), Disconnected> {
        let plan = [
            (StreamKind::Status, self.config.status_replay_count),
            (StreamKind::Log, self.config.log_replay_count),
        ];

        for (kind, count) in plan {
            if count == 0 {
                self.skip_history(store, kind).await?;
                continue;
            }
            let Some(entries) = self.history(store, kind, count).await? else {
                continue;
            };
            tracing::debug!(
                stream = %self.keys.key(kind),
                entries = entries.len(),
                "Replaying history"
            );
            // Newest first from the store.
            for entry in entries.iter().rev() {
                self.accept(kind, entry).await?;
            }
        }
        Ok(())
    }

    /// Start the stream's live reads after its newest entry without
    /// emitting anything.
    async fn skip_history(
        &mut self,
        store: &Arc<dyn EventStore>,
        kind: StreamKind,
    ) -> Result<(), Disconnected> {
        if let Some(newest) = self.history(store, kind, 1).await?.and_then(|mut e| e.pop()) {
            tracing::debug!(stream = %self.keys.key(kind), id = %newest.id, "History suppressed");
            self.session.cursor_mut(kind).advance(&newest.id);
        }
        Ok(())
    }

    async fn history(
        &self,
        store: &Arc<dyn EventStore>,
        kind: StreamKind,
        count: usize,
    ) -> Result<Option<Vec<RawEntry>>, Disconnected> {
        let key = self.keys.key(kind).to_string();
        let store = Arc::clone(store);
        let read = tokio::task::spawn_blocking(move || store.range_read(&key, count));

        let result = tokio::select! {
            () = self.sink.closed() => return Err(Disconnected),
            result = read => result,
        };

        match result {
            Ok(Ok(entries)) => Ok(Some(entries)),
            Ok(Err(err)) => {
                tracing::warn!(stream = %self.keys.key(kind), error = %err, "History unavailable");
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(stream = %self.keys.key(kind), error = %err, "History read aborted");
                Ok(None)
            }
        }
    }
}
