//! Drain pass: replays unsynced queue entries against the remote store.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::report::{DrainReport, DrainTrigger, EntryOutcome};
use crate::state::StatePublisher;
use std::sync::Arc;
use std::time::Duration;
use tillsync_codec::{Record, Value};
use tillsync_core::{MutationQueue, Operation, QueueEntry};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Replays the queue one entry at a time, in creation order.
///
/// At most one pass runs at a time. A pass never dispatches two entries
/// concurrently, and a failing entry does not stop the ones after it.
pub(crate) struct SyncDriver {
    queue: MutationQueue,
    remote: Arc<dyn RemoteStore>,
    state: Arc<StatePublisher>,
    dispatch_timeout: Duration,
    in_flight: Mutex<()>,
}

impl SyncDriver {
    pub(crate) fn new(
        queue: MutationQueue,
        remote: Arc<dyn RemoteStore>,
        state: Arc<StatePublisher>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            remote,
            state,
            dispatch_timeout,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one drain pass.
    ///
    /// If a pass is already running the call returns at once with a
    /// `deferred` report. Remote failures end up in the report; only local
    /// store failures are returned as errors.
    pub(crate) async fn drain(&self, trigger: DrainTrigger) -> SyncResult<DrainReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!(%trigger, "drain already in flight");
            let mut report = DrainReport::empty(trigger, self.queue.pending_count());
            report.deferred = true;
            return Ok(report);
        };

        let snapshot = self.queue.pending();
        if snapshot.is_empty() {
            self.state.set_pending_with(|| 0);
            return Ok(DrainReport::empty(trigger, 0));
        }

        let start = Instant::now();
        self.state.set_syncing(true);
        let result = self.run_pass(trigger, &snapshot).await;
        self.state.set_syncing(false);
        self.state.set_pending_with(|| self.queue.pending_count());

        let mut report = result?;
        report.elapsed = start.elapsed();
        info!(
            %trigger,
            dispatched = report.outcomes.len(),
            synced = report.synced_count(),
            failed = report.failed_count(),
            pending = report.pending_after,
            "drain pass finished"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        trigger: DrainTrigger,
        snapshot: &[QueueEntry],
    ) -> SyncResult<DrainReport> {
        let mut outcomes = Vec::with_capacity(snapshot.len());

        for entry in snapshot {
            let outcome = match self.dispatch(entry).await {
                Ok(()) => {
                    self.queue.mark_synced(entry.id)?;
                    EntryOutcome::Synced
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        table = %entry.table,
                        operation = %entry.operation,
                        error = %e,
                        "entry left queued"
                    );
                    EntryOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((entry.id, outcome));
        }

        let removed = self.queue.clear_synced()?;
        let mut report = DrainReport::empty(trigger, self.queue.pending_count());
        report.outcomes = outcomes;
        report.removed = removed;
        Ok(report)
    }

    async fn dispatch(&self, entry: &QueueEntry) -> SyncResult<()> {
        debug!(entry_id = %entry.id, table = %entry.table, operation = %entry.operation, "dispatch");

        tokio::time::timeout(self.dispatch_timeout, self.call_remote(entry))
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    async fn call_remote(&self, entry: &QueueEntry) -> SyncResult<()> {
        match entry.operation {
            Operation::Insert => self
                .remote
                .insert(&entry.table, &entry.payload)
                .await
                .map(|_| ()),
            Operation::Update => {
                let (key, fields) = self.split_key(entry)?;
                self.remote
                    .update(&entry.table, &key, &fields)
                    .await
                    .map(|_| ())
            }
            Operation::Delete => {
                let (key, _) = self.split_key(entry)?;
                self.remote.delete(&entry.table, &key).await
            }
        }
    }

    fn split_key(&self, entry: &QueueEntry) -> SyncResult<(Value, Record)> {
        let key_field = &self.queue.store().config().key_field;
        entry
            .payload
            .split_key(key_field)
            .ok_or_else(|| SyncError::MissingKey {
                table: entry.table.clone(),
                operation: entry.operation,
                key_field: key_field.clone(),
            })
    }
}
