//! The sync engine: one coordinator task that owns every drain pass.

use crate::config::{RetryConfig, SyncConfig};
use crate::connectivity::{spawn_monitor, Reachability};
use crate::driver::SyncDriver;
use crate::error::{SyncError, SyncResult};
use crate::refresher::{spawn_schedule, CacheRefresher, RefreshOutcome};
use crate::remote::RemoteStore;
use crate::report::{DrainReport, DrainTrigger, EntryOutcome};
use crate::state::{ConnectivityState, StatePublisher, SyncStats};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tillsync_codec::Record;
use tillsync_core::{CacheStore, EntryId, LocalStore, MutationQueue, Operation};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Waiter = oneshot::Sender<SyncResult<DrainReport>>;

/// Messages posted to the coordinator.
pub(crate) enum Command {
    Drain {
        trigger: DrainTrigger,
        reply: Option<Waiter>,
    },
    Shutdown,
}

/// Offline-first sync engine.
///
/// Writes go to the durable queue through [`add_to_queue`](Self::add_to_queue)
/// and are replayed against the remote store when connectivity returns, when
/// [`sync`](Self::sync) is called, or when a retry timer fires. All of those
/// are messages to a single coordinator task, so only one drain pass ever
/// runs and triggers that arrive mid-pass are folded into it.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tillsync_codec::record;
/// use tillsync_core::{LocalStore, Operation};
/// use tillsync_sync_engine::{MemoryRemote, Reachability, SyncConfig, SyncEngine};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(LocalStore::open_in_memory()?);
/// let remote = Arc::new(MemoryRemote::new());
/// let reachability = Reachability::new(true);
///
/// let engine = SyncEngine::start(store, remote.clone(), &reachability, SyncConfig::default());
/// engine.add_to_queue("orders", Operation::Insert, record! { "id" => "O1", "total" => 5000 })?;
///
/// let report = engine.sync().await?;
/// assert_eq!(report.synced_count(), 1);
/// assert_eq!(engine.pending_count(), 0);
///
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    queue: MutationQueue,
    cache: CacheStore,
    config: Arc<SyncConfig>,
    state: Arc<StatePublisher>,
    stats: Arc<RwLock<SyncStats>>,
    refresher: Arc<CacheRefresher>,
    commands: mpsc::Sender<Command>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    schedule: Mutex<Option<JoinHandle<()>>>,
    /// Refresh started by the monitor on reconnection.
    reconnect_refresh: Arc<Mutex<Option<JoinHandle<()>>>>,
    shut_down: AtomicBool,
}

impl SyncEngine {
    /// Starts the engine over an opened store.
    ///
    /// The current reachability is applied as the initial state without
    /// draining. Later changes to online drain the queue once.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        reachability: &Reachability,
        config: SyncConfig,
    ) -> Self {
        let config = Arc::new(config);
        let queue = MutationQueue::new(Arc::clone(&store));
        let cache = CacheStore::new(store);

        let mut signal = reachability.subscribe();
        let initial = *signal.borrow_and_update();
        let state = Arc::new(StatePublisher::new(ConnectivityState {
            online: initial.reachable,
            pending_count: queue.pending_count(),
            is_syncing: false,
        }));
        let stats = Arc::new(RwLock::new(SyncStats::default()));

        let refresher = Arc::new(CacheRefresher::new(
            Arc::clone(&remote),
            cache.clone(),
            Arc::clone(&state),
            Arc::clone(&stats),
            Arc::clone(&config),
        ));

        let (commands, receiver) = mpsc::channel(config.command_buffer);
        let coordinator = Coordinator {
            driver: SyncDriver::new(
                queue.clone(),
                remote,
                Arc::clone(&state),
                config.dispatch_timeout,
            ),
            queue: queue.clone(),
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            retry: config.retry.clone(),
            commands: receiver,
            attempt: 0,
            retry_at: None,
        };
        let coordinator = tokio::spawn(coordinator.run());
        let reconnect_refresh = Arc::new(Mutex::new(None));
        let monitor = spawn_monitor(
            signal,
            initial,
            Arc::clone(&state),
            commands.clone(),
            Arc::clone(&refresher),
            Arc::clone(&reconnect_refresh),
        );

        info!(
            online = initial.reachable,
            pending = queue.pending_count(),
            "sync engine started"
        );

        Self {
            queue,
            cache,
            config,
            state,
            stats,
            refresher,
            commands,
            coordinator: Mutex::new(Some(coordinator)),
            monitor: Mutex::new(Some(monitor)),
            schedule: Mutex::new(None),
            reconnect_refresh,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Records a mutation intent durably and returns its id.
    ///
    /// Works the same online and offline; connectivity never makes it fail.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Store`] wrapping [`CoreError::InvalidArgument`] for a
    ///   blank table name
    /// - [`SyncError::Store`] wrapping [`CoreError::MissingKey`] for an
    ///   update or delete whose payload lacks the key field
    /// - [`SyncError::Store`] for any local persistence failure
    /// - [`SyncError::Shutdown`] after [`shutdown`](Self::shutdown)
    ///
    /// [`CoreError::InvalidArgument`]: tillsync_core::CoreError::InvalidArgument
    /// [`CoreError::MissingKey`]: tillsync_core::CoreError::MissingKey
    pub fn add_to_queue(
        &self,
        table: &str,
        operation: Operation,
        payload: Record,
    ) -> SyncResult<EntryId> {
        self.ensure_running()?;
        let id = self.queue.enqueue(table, operation, payload)?;
        self.state.set_pending_with(|| self.queue.pending_count());

        if self.config.drain_on_enqueue && self.state.current().online {
            let drain = Command::Drain {
                trigger: DrainTrigger::Enqueued,
                reply: None,
            };
            if let Err(e) = self.commands.try_send(drain) {
                debug!(error = %e, "enqueue trigger dropped");
            }
        }
        Ok(id)
    }

    /// Drains the queue now and waits for the pass that covered this request.
    ///
    /// Returns [`SyncError::Offline`] while offline. Remote failures are
    /// reported per entry in the returned report.
    pub async fn sync(&self) -> SyncResult<DrainReport> {
        self.ensure_running()?;
        if !self.state.current().online {
            return Err(SyncError::Offline);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Drain {
                trigger: DrainTrigger::Manual,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SyncError::Shutdown)?;
        response.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Refreshes the cache for `scope` now, subject to the rate limit.
    pub async fn refresh_now(&self, scope: &str) -> SyncResult<RefreshOutcome> {
        self.ensure_running()?;
        Ok(self.refresher.refresh(scope).await)
    }

    /// Makes `scope` the active scope: refreshes immediately, then on every
    /// refresh tick until deactivated. Replaces any previous schedule.
    pub fn activate_scope(&self, scope: impl Into<String>) -> SyncResult<()> {
        self.ensure_running()?;
        let scope = scope.into();
        info!(scope = scope.as_str(), "scope activated");

        self.refresher.set_active_scope(Some(scope.clone()));
        let handle = spawn_schedule(Arc::clone(&self.refresher), scope);
        if let Some(previous) = self.schedule.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Cancels the refresh timer of the active scope.
    pub fn deactivate_scope(&self) {
        self.refresher.set_active_scope(None);
        if let Some(handle) = self.schedule.lock().take() {
            handle.abort();
            debug!("scope deactivated");
        }
    }

    /// The scope whose refresh timer is running.
    pub fn active_scope(&self) -> Option<String> {
        self.refresher.active_scope()
    }

    /// Whether the remote store is currently reachable.
    pub fn is_online(&self) -> bool {
        self.state.current().online
    }

    /// Unsynced entries, recomputed from the queue.
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Whether a drain pass is in flight.
    pub fn is_syncing(&self) -> bool {
        self.state.current().is_syncing
    }

    /// Current published state.
    pub fn state(&self) -> ConnectivityState {
        self.state.current()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Snapshot of the engine statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The durable mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// The reference data cache.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stops the coordinator, the monitor and every refresh task.
    ///
    /// A pass in flight finishes first. Every later call on the engine
    /// returns [`SyncError::Shutdown`].
    pub async fn shutdown(&self) -> SyncResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Shutdown);
        }

        self.refresher.set_active_scope(None);
        let schedule = self.schedule.lock().take();
        let monitor = self.monitor.lock().take();
        for task in [schedule, monitor].into_iter().flatten() {
            task.abort();
            // Wait until the task has released its handles on the store.
            let _ = task.await;
        }
        // Taken after the monitor is gone so no newer one can appear
        let reconnect_refresh = self.reconnect_refresh.lock().take();
        if let Some(task) = reconnect_refresh {
            task.abort();
            let _ = task.await;
        }

        // The coordinator also exits once every sender is gone.
        let _ = self.commands.send(Command::Shutdown).await;
        let coordinator = self.coordinator.lock().take();
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                warn!(error = %e, "coordinator task ended abnormally");
            }
        }

        info!("sync engine stopped");
        Ok(())
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(SyncError::Shutdown)
        } else {
            Ok(())
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let tasks = [
            &self.coordinator,
            &self.monitor,
            &self.schedule,
            &*self.reconnect_refresh,
        ];
        for task in tasks {
            if let Some(handle) = task.lock().take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state.current())
            .field("active_scope", &self.refresher.active_scope())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

/// Drain commands that arrived while a pass was running.
#[derive(Default)]
struct Folded {
    count: usize,
    trigger: Option<DrainTrigger>,
    waiters: Vec<Waiter>,
    shutdown: bool,
}

struct Coordinator {
    driver: SyncDriver,
    queue: MutationQueue,
    state: Arc<StatePublisher>,
    stats: Arc<RwLock<SyncStats>>,
    retry: RetryConfig,
    commands: mpsc::Receiver<Command>,
    /// Consecutive passes that left failures.
    attempt: u32,
    retry_at: Option<Instant>,
}

impl Coordinator {
    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            let command = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)),
                    if retry_at.is_some() =>
                {
                    self.retry_at = None;
                    Command::Drain {
                        trigger: DrainTrigger::Retry,
                        reply: None,
                    }
                }
            };

            match command {
                Command::Shutdown => break,
                Command::Drain { trigger, reply } => {
                    if !self.handle_drain(trigger, reply).await {
                        break;
                    }
                }
            }
        }
        debug!("coordinator stopped");
    }

    /// Runs passes until every waiter has an answer. Returns false once a
    /// shutdown was seen.
    async fn handle_drain(&mut self, trigger: DrainTrigger, reply: Option<Waiter>) -> bool {
        let mut trigger = trigger;
        let mut waiters: Vec<Waiter> = reply.into_iter().collect();

        loop {
            if trigger == DrainTrigger::Reconnected {
                self.attempt = 0;
            }
            let result = self.pass(trigger).await;
            let mut folded = self.fold_queued();

            // Triggers that arrived mid-pass ride on it, unless entries were
            // enqueued after the pass took its snapshot.
            let rerun = match (&result, folded.trigger) {
                (Ok(report), Some(next)) if !folded.shutdown && self.has_unattempted(report) => {
                    Some(next)
                }
                _ => None,
            };
            if let Some(next) = rerun {
                debug!(folded = folded.count, "running follow-up pass");
                respond(std::mem::take(&mut waiters), &result, 0);
                waiters = std::mem::take(&mut folded.waiters);
                trigger = next;
                continue;
            }

            self.schedule_retry(&result);
            waiters.append(&mut folded.waiters);
            respond(waiters, &result, folded.count);
            return !folded.shutdown;
        }
    }

    async fn pass(&mut self, trigger: DrainTrigger) -> SyncResult<DrainReport> {
        if !self.state.current().online {
            debug!(%trigger, "drain skipped: offline");
            return Err(SyncError::Offline);
        }

        let result = self.driver.drain(trigger).await;

        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.drains_completed += 1;
                stats.entries_synced += report.synced_count() as u64;
                stats.entries_failed += report.failed_count() as u64;
                stats.last_drain_at = Some(std::time::Instant::now());
                let first_failure = report.outcomes.iter().find_map(|(_, o)| match o {
                    EntryOutcome::Failed(reason) => Some(reason.clone()),
                    EntryOutcome::Synced => None,
                });
                if first_failure.is_some() {
                    stats.last_error = first_failure;
                }
            }
            Err(e) => {
                warn!(%trigger, error = %e, "drain pass aborted");
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    fn fold_queued(&mut self) -> Folded {
        let mut folded = Folded::default();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Shutdown => {
                    folded.shutdown = true;
                    break;
                }
                Command::Drain { trigger, reply } => {
                    if trigger == DrainTrigger::Reconnected {
                        self.attempt = 0;
                    }
                    folded.count += 1;
                    folded.trigger.get_or_insert(trigger);
                    folded.waiters.extend(reply);
                }
            }
        }
        folded
    }

    fn has_unattempted(&self, report: &DrainReport) -> bool {
        self.queue
            .pending()
            .iter()
            .any(|entry| report.outcome(entry.id).is_none())
    }

    fn schedule_retry(&mut self, result: &SyncResult<DrainReport>) {
        match result {
            Ok(report) if !report.is_clean() => {
                self.attempt += 1;
                if self.retry.allows_retry_after(self.attempt) && self.state.current().online {
                    let delay = self.retry.delay_for_attempt(self.attempt);
                    debug!(attempt = self.attempt, ?delay, "retry scheduled");
                    self.retry_at = Some(Instant::now() + delay);
                } else {
                    warn!(
                        attempts = self.attempt,
                        pending = report.pending_after,
                        "retries exhausted; waiting for the next trigger"
                    );
                    self.retry_at = None;
                }
            }
            Ok(_) => {
                self.attempt = 0;
                self.retry_at = None;
            }
            Err(_) => self.retry_at = None,
        }
    }
}

/// Answers every waiter with the same pass result.
fn respond(waiters: Vec<Waiter>, result: &SyncResult<DrainReport>, coalesced: usize) {
    for waiter in waiters {
        let reply = match result {
            Ok(report) => {
                let mut report = report.clone();
                report.coalesced = coalesced;
                Ok(report)
            }
            Err(e) => Err(share_error(e)),
        };
        // The caller may have stopped waiting.
        let _ = waiter.send(reply);
    }
}

fn share_error(error: &SyncError) -> SyncError {
    match error {
        SyncError::Offline => SyncError::Offline,
        SyncError::Shutdown => SyncError::Shutdown,
        SyncError::Timeout => SyncError::Timeout,
        other => SyncError::DrainFailed(other.to_string()),
    }
}
