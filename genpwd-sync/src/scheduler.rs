//! Background sync triggers with re-evaluated constraints.
//!
//! Each schedule is a tokio task. At every trigger the constraint is checked
//! again; an unsatisfied constraint defers the cycle (status `PENDING`, no
//! network call) and re-checks on a fixed interval until it holds.

use crate::config::SchedulerConfig;
use crate::conflict::ResolutionStrategy;
use crate::error::SyncError;
use crate::history::HistoryOutcome;
use crate::manager::{SyncOutcome, VaultSyncManager};
use crate::status::SyncStatus;
use genpwd_crypto::{VaultEnvelope, Zeroizing};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(1);

// ── Constraints ──

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    Metered,
    Unmetered,
}

/// Reports the device's current connectivity.
pub trait NetworkMonitor: Send + Sync {
    fn current(&self) -> NetworkState;
}

/// Condition that must hold when a trigger fires.
pub trait SyncConstraint: Send + Sync {
    fn is_satisfied(&self) -> bool;

    fn describe(&self) -> String {
        "custom constraint".to_string()
    }
}

/// Any connection, metered or not.
pub struct NetworkConnected {
    monitor: Arc<dyn NetworkMonitor>,
}

impl NetworkConnected {
    pub fn new(monitor: Arc<dyn NetworkMonitor>) -> Self {
        Self { monitor }
    }
}

impl SyncConstraint for NetworkConnected {
    fn is_satisfied(&self) -> bool {
        self.monitor.current() != NetworkState::Offline
    }

    fn describe(&self) -> String {
        "network connection".to_string()
    }
}

/// Wi-Fi or ethernet only.
pub struct UnmeteredNetworkOnly {
    monitor: Arc<dyn NetworkMonitor>,
}

impl UnmeteredNetworkOnly {
    pub fn new(monitor: Arc<dyn NetworkMonitor>) -> Self {
        Self { monitor }
    }
}

impl SyncConstraint for UnmeteredNetworkOnly {
    fn is_satisfied(&self) -> bool {
        self.monitor.current() == NetworkState::Unmetered
    }

    fn describe(&self) -> String {
        "unmetered network".to_string()
    }
}

/// Wraps a closure as a constraint.
pub struct Predicate<F>(pub F);

impl<F> SyncConstraint for Predicate<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_satisfied(&self) -> bool {
        (self.0)()
    }
}

/// Always satisfied.
pub struct NoConstraint;

impl SyncConstraint for NoConstraint {
    fn is_satisfied(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

// ── Credentials & Events ──

/// Master password held for unattended runs; wiped on drop.
#[derive(Clone)]
pub struct SyncCredentials {
    password: Zeroizing<String>,
}

impl SyncCredentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
        }
    }

    fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for SyncCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncCredentials([REDACTED])")
    }
}

/// Emitted by scheduled runs for the UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    Completed {
        vault_id: String,
        outcome: HistoryOutcome,
    },
    /// Constraint not met; the cycle did not start.
    Deferred { vault_id: String, reason: String },
    /// `MANUAL` strategy hit a conflict. Surface it to the user.
    ConflictPending { vault_id: String },
    Failed {
        vault_id: String,
        error: String,
        requires_user_action: bool,
    },
}

// ── Scheduler ──

struct ScheduledJob {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type JobMap = Mutex<HashMap<String, ScheduledJob>>;

/// Runs periodic and one-time syncs in the background.
pub struct AutoSyncScheduler {
    manager: Arc<VaultSyncManager>,
    config: SchedulerConfig,
    periodic: JobMap,
    /// Shared with the tasks so a finished run can remove itself.
    one_time: Arc<JobMap>,
    next_id: AtomicU64,
    events: broadcast::Sender<SchedulerEvent>,
    root: CancellationToken,
}

impl AutoSyncScheduler {
    pub fn new(manager: Arc<VaultSyncManager>, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            manager,
            config,
            periodic: Mutex::new(HashMap::new()),
            one_time: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            events,
            root: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Syncs `vault_id` every `interval`, first run right away. Replaces an
    /// existing periodic schedule for the same vault.
    pub fn schedule_periodic_sync(
        &self,
        vault_id: &str,
        credentials: SyncCredentials,
        interval: Duration,
        constraint: Arc<dyn SyncConstraint>,
        strategy: ResolutionStrategy,
    ) {
        let interval = if interval < MIN_PERIODIC_INTERVAL {
            warn!("periodic sync interval {interval:?} raised to {MIN_PERIODIC_INTERVAL:?}");
            MIN_PERIODIC_INTERVAL
        } else {
            interval
        };

        let trigger = self.trigger(vault_id, credentials, constraint, strategy);
        let cancel = trigger.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = trigger.cancel.cancelled() => break,
                    _ = ticker.tick() => trigger.fire().await,
                }
            }
            debug!("periodic sync for vault {} stopped", trigger.vault_id);
        });

        info!("scheduled periodic sync of vault {vault_id} every {interval:?}");
        let id = self.next_id();
        replace_job(
            lock(&self.periodic),
            vault_id,
            ScheduledJob { id, cancel, handle },
        );
    }

    /// Runs one sync of `vault_id` after `delay`. Replaces a pending
    /// one-time run for the same vault.
    pub fn schedule_one_time_sync(
        &self,
        vault_id: &str,
        credentials: SyncCredentials,
        delay: Duration,
        constraint: Arc<dyn SyncConstraint>,
        strategy: ResolutionStrategy,
    ) {
        let trigger = self.trigger(vault_id, credentials, constraint, strategy);
        let cancel = trigger.cancel.clone();
        let id = self.next_id();
        let registry = self.one_time.clone();

        // Held until the job is registered, so the task cannot finish and
        // look for its entry before it exists.
        let jobs = lock(&self.one_time);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = trigger.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => trigger.fire().await,
            }
            let mut jobs = lock(&registry);
            if jobs.get(&trigger.vault_id).is_some_and(|job| job.id == id) {
                jobs.remove(&trigger.vault_id);
            }
        });

        info!("scheduled one-time sync of vault {vault_id} in {delay:?}");
        replace_job(jobs, vault_id, ScheduledJob { id, cancel, handle });
    }

    /// Stops the periodic schedule of a vault. Returns whether one was
    /// running; calling it again is harmless.
    pub fn cancel_periodic_sync(&self, vault_id: &str) -> bool {
        match lock(&self.periodic).remove(vault_id) {
            Some(job) => {
                job.cancel.cancel();
                info!("cancelled periodic sync of vault {vault_id}");
                true
            }
            None => false,
        }
    }

    /// Whether a one-time run for the vault is still waiting or running.
    pub fn has_pending_one_time_sync(&self, vault_id: &str) -> bool {
        lock(&self.one_time).contains_key(vault_id)
    }

    pub fn is_scheduled(&self, vault_id: &str) -> bool {
        lock(&self.periodic)
            .get(vault_id)
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Cancels every schedule and waits for running cycles to stop.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let jobs: Vec<ScheduledJob> = lock(&self.periodic)
            .drain()
            .chain(lock(&self.one_time).drain())
            .map(|(_, job)| job)
            .collect();
        for job in jobs {
            if let Err(e) = job.handle.await {
                warn!("scheduled sync task ended abnormally: {e}");
            }
        }
        info!("sync scheduler stopped");
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn trigger(
        &self,
        vault_id: &str,
        credentials: SyncCredentials,
        constraint: Arc<dyn SyncConstraint>,
        strategy: ResolutionStrategy,
    ) -> Trigger {
        Trigger {
            manager: self.manager.clone(),
            vault_id: vault_id.to_string(),
            credentials,
            constraint,
            strategy,
            recheck: self.config.constraint_recheck_interval(),
            events: self.events.clone(),
            cancel: self.root.child_token(),
        }
    }
}

impl Drop for AutoSyncScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn replace_job(
    mut jobs: MutexGuard<'_, HashMap<String, ScheduledJob>>,
    vault_id: &str,
    job: ScheduledJob,
) {
    jobs.retain(|_, job| !job.handle.is_finished());
    if let Some(previous) = jobs.insert(vault_id.to_string(), job) {
        previous.cancel.cancel();
    }
}

/// Everything one scheduled run needs.
struct Trigger {
    manager: Arc<VaultSyncManager>,
    vault_id: String,
    credentials: SyncCredentials,
    constraint: Arc<dyn SyncConstraint>,
    strategy: ResolutionStrategy,
    recheck: Duration,
    events: broadcast::Sender<SchedulerEvent>,
    cancel: CancellationToken,
}

impl Trigger {
    async fn fire(&self) {
        if self.wait_for_constraint().await {
            self.run().await;
        }
    }

    /// Returns false when cancelled while waiting.
    async fn wait_for_constraint(&self) -> bool {
        loop {
            if self.constraint.is_satisfied() {
                return true;
            }
            let reason = self.constraint.describe();
            debug!("vault {} sync deferred: waiting for {reason}", self.vault_id);
            self.manager
                .status()
                .set_status(&self.vault_id, SyncStatus::Pending);
            self.emit(SchedulerEvent::Deferred {
                vault_id: self.vault_id.clone(),
                reason,
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.recheck) => {}
            }
        }
    }

    async fn run(&self) {
        let result = self
            .manager
            .sync_vault_cancellable(&self.vault_id, self.credentials.password(), &self.cancel)
            .await;
        match result {
            Ok(SyncOutcome::Conflict { local, remote }) => {
                self.settle_conflict(&local, &remote).await;
            }
            Ok(outcome) => self.emit(SchedulerEvent::Completed {
                vault_id: self.vault_id.clone(),
                outcome: outcome.history_outcome(),
            }),
            Err(SyncError::Cancelled) => {
                debug!("scheduled sync of vault {} cancelled", self.vault_id);
            }
            Err(e) => self.fail(e),
        }
    }

    async fn settle_conflict(&self, local: &VaultEnvelope, remote: &VaultEnvelope) {
        if self.strategy == ResolutionStrategy::Manual {
            warn!("vault {} has a conflict awaiting a manual decision", self.vault_id);
            self.manager.status().flag_conflict(&self.vault_id);
            self.emit(SchedulerEvent::ConflictPending {
                vault_id: self.vault_id.clone(),
            });
            return;
        }

        let resolved = self
            .manager
            .resolve_conflict(
                &self.vault_id,
                local,
                remote,
                self.strategy,
                self.credentials.password(),
            )
            .await;
        match resolved {
            Ok(winner) => {
                info!(
                    "vault {} conflict auto-resolved with {}: {} wins",
                    self.vault_id,
                    self.strategy,
                    winner.as_str()
                );
                self.emit(SchedulerEvent::Completed {
                    vault_id: self.vault_id.clone(),
                    outcome: HistoryOutcome::Resolved,
                });
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, e: SyncError) {
        error!("scheduled sync of vault {} failed: {e}", self.vault_id);
        self.emit(SchedulerEvent::Failed {
            vault_id: self.vault_id.clone(),
            error: e.to_string(),
            requires_user_action: e.requires_user_action(),
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
