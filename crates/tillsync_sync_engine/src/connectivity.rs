//! Reachability signal and the monitor that turns it into engine state.

use crate::engine::Command;
use crate::refresher::CacheRefresher;
use crate::report::DrainTrigger;
use crate::state::StatePublisher;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Signal {
    pub(crate) reachable: bool,
    /// Bumped on every online-to-offline change, so a flap that ends where it
    /// started is still seen as a reconnection.
    pub(crate) outages: u64,
}

/// The host environment's "is the remote reachable" signal.
///
/// Hosts call [`set`](Self::set) from their native network callbacks.
/// Cloning is cheap; clones report into the same signal.
#[derive(Debug, Clone)]
pub struct Reachability {
    tx: Arc<watch::Sender<Signal>>,
}

impl Reachability {
    /// Creates a signal with the given initial value.
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(Signal {
            reachable,
            outages: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Reports the current reachability.
    pub fn set(&self, reachable: bool) {
        self.tx.send_if_modified(|signal| {
            if signal.reachable == reachable {
                return false;
            }
            if !reachable {
                signal.outages += 1;
            }
            signal.reachable = reachable;
            true
        });
    }

    /// Current reachability.
    pub fn is_reachable(&self) -> bool {
        self.tx.borrow().reachable
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Signal> {
        self.tx.subscribe()
    }
}

/// Watches the signal and publishes `online`.
///
/// A change to online posts one reconnection drain and an opportunistic
/// refresh of the active scope; a change to offline only flips the flag.
/// `last` is the value the caller already applied, without any drain.
/// The refresh task is kept in `refresh_task` so the owner can stop it; a
/// newer reconnection replaces it.
pub(crate) fn spawn_monitor(
    mut signal: watch::Receiver<Signal>,
    mut last: Signal,
    state: Arc<StatePublisher>,
    commands: mpsc::Sender<Command>,
    refresher: Arc<CacheRefresher>,
    refresh_task: Arc<Mutex<Option<JoinHandle<()>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while signal.changed().await.is_ok() {
            let current = *signal.borrow_and_update();
            let reconnected =
                current.reachable && (!last.reachable || current.outages != last.outages);
            let disconnected = !current.reachable && last.reachable;
            last = current;

            if disconnected {
                info!("connectivity lost");
                state.set_online(false);
            } else if reconnected {
                info!("connectivity restored");
                state.set_online(true);
                let drain = Command::Drain {
                    trigger: DrainTrigger::Reconnected,
                    reply: None,
                };
                if commands.send(drain).await.is_err() {
                    break;
                }
                let refresher = Arc::clone(&refresher);
                let task = tokio::spawn(async move {
                    refresher.refresh_active().await;
                });
                if let Some(previous) = refresh_task.lock().replace(task) {
                    previous.abort();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_counts_outages() {
        let reach = Reachability::new(true);
        let rx = reach.subscribe();

        reach.set(true);
        assert_eq!(rx.borrow().outages, 0);

        reach.set(false);
        reach.set(true);
        assert!(reach.is_reachable());
        assert_eq!(rx.borrow().outages, 1);
    }
}
