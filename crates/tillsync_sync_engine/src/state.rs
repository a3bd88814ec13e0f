//! Published engine state and statistics.

use std::time::Instant;
use tokio::sync::watch;

/// Process-wide state exposed to presentation layers.
///
/// Each field has a single writer: the connectivity monitor owns `online`,
/// the sync driver owns `is_syncing`, and `pending_count` follows the
/// queue after every enqueue and every drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    /// Whether the remote store is currently reachable.
    pub online: bool,
    /// Queue entries not yet acknowledged.
    pub pending_count: usize,
    /// Whether a drain pass is in flight.
    pub is_syncing: bool,
}

/// Write side of [`ConnectivityState`].
#[derive(Debug)]
pub(crate) struct StatePublisher {
    tx: watch::Sender<ConnectivityState>,
}

impl StatePublisher {
    pub(crate) fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    pub(crate) fn current(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|s| replace(&mut s.online, online));
    }

    pub(crate) fn set_syncing(&self, is_syncing: bool) {
        self.tx.send_if_modified(|s| replace(&mut s.is_syncing, is_syncing));
    }

    /// Recomputes the pending count while holding the channel, so the last
    /// writer always publishes the latest count.
    pub(crate) fn set_pending_with(&self, count: impl FnOnce() -> usize) {
        self.tx
            .send_if_modified(|s| replace(&mut s.pending_count, count()));
    }
}

/// Assigns and reports whether the value changed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Drain passes that ran to completion.
    pub drains_completed: u64,
    /// Entries acknowledged by the remote store.
    pub entries_synced: u64,
    /// Failed dispatch attempts.
    pub entries_failed: u64,
    /// Successful cache refreshes.
    pub refreshes_completed: u64,
    /// Failed cache refreshes.
    pub refreshes_failed: u64,
    /// When the last drain pass finished.
    pub last_drain_at: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_notify_only_on_change() {
        let publisher = StatePublisher::new(ConnectivityState::default());
        let mut rx = publisher.subscribe();

        publisher.set_online(false);
        assert!(!rx.has_changed().unwrap());

        publisher.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().online);

        publisher.set_pending_with(|| 3);
        publisher.set_syncing(true);
        assert_eq!(
            publisher.current(),
            ConnectivityState {
                online: true,
                pending_count: 3,
                is_syncing: true,
            }
        );
    }
}
