//! # Expiration Scheduler
//!
//! Records can ask their owner's node to act on its own at some instant;
//! a sale proposal asks its seller to cancel it once it has expired. The
//! scheduler keeps those deadlines in memory, derived from the vault:
//!
//! ```text
//!   vault.updates() ──▶ listener ──▶ produced with activity for us? register
//!                                └─▶ consumed?                     unregister
//!                                          │
//!                                        Notify
//!                                          ▼
//!   timer: sleep until earliest ──▶ ActivityRunner::run(activity)
//! ```
//!
//! Nothing is persisted: on start the deadlines are re-derived from the
//! unconsumed records in the vault. A run that loses the race against a
//! counterparty (the record was spent first) is expected and discarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::duration_until;
use crate::flows::FlowError;
use crate::ledger::{ScheduledActivity, StateAndRef, StateRef};
use crate::network::Node;
use crate::vault::{QueryCriteria, VaultError, VaultUpdate};

/// Placeholder sleep while nothing is scheduled; the branch is disabled.
const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Carries out a due activity. Implemented by the application, which
/// knows how to build the transaction an activity stands for.
#[async_trait]
pub trait ActivityRunner: Send + Sync {
    async fn run(&self, node: Arc<Node>, activity: ScheduledActivity) -> Result<(), FlowError>;
}

/// Pending activities ordered by deadline.
#[derive(Debug, Default)]
struct Schedule {
    by_deadline: BTreeMap<(DateTime<Utc>, StateRef), ScheduledActivity>,
    by_reference: HashMap<StateRef, DateTime<Utc>>,
}

impl Schedule {
    fn register(&mut self, activity: ScheduledActivity) {
        self.unregister(&activity.reference);
        self.by_reference.insert(activity.reference, activity.at);
        self.by_deadline.insert((activity.at, activity.reference), activity);
    }

    fn unregister(&mut self, reference: &StateRef) -> bool {
        match self.by_reference.remove(reference) {
            Some(at) => self.by_deadline.remove(&(at, *reference)).is_some(),
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return everything due at or before `now`.
    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledActivity> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let activity = entry.remove();
            self.by_reference.remove(&activity.reference);
            due.push(activity);
        }
        due
    }

    fn len(&self) -> usize {
        self.by_deadline.len()
    }
}

pub struct ExpirationScheduler {
    node: Arc<Node>,
    runner: Arc<dyn ActivityRunner>,
    schedule: Mutex<Schedule>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl ExpirationScheduler {
    pub fn new(node: Arc<Node>, runner: Arc<dyn ActivityRunner>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            node,
            runner,
            schedule: Mutex::new(Schedule::default()),
            wake: Notify::new(),
            shutdown,
        })
    }

    /// Number of activities waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.schedule.lock().len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.schedule.lock().next_deadline()
    }

    /// Derive deadlines from the vault and start the listener and timer
    /// tasks. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, VaultError> {
        // Subscribe before scanning so nothing recorded in between is missed.
        let updates = self.node.vault().updates();
        self.rederive()?;
        info!(party = %self.node.party(), pending = self.pending(), "expiration scheduler starting");

        let listener = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.listen(updates).await })
        };
        let timer = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.run_timer().await })
        };
        Ok(vec![listener, timer])
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn rederive(&self) -> Result<(), VaultError> {
        let live = self.node.vault().query_all(&QueryCriteria::unconsumed())?;
        let mut schedule = self.schedule.lock();
        *schedule = Schedule::default();
        for sar in &live {
            if let Some(activity) = self.activity_for(sar) {
                schedule.register(activity);
            }
        }
        drop(schedule);
        self.wake.notify_one();
        Ok(())
    }

    fn activity_for(&self, sar: &StateAndRef) -> Option<ScheduledActivity> {
        sar.state
            .data
            .next_scheduled_activity(&sar.reference)
            .filter(|activity| self.node.keys().is_mine(&activity.actor))
    }

    fn apply(&self, update: &VaultUpdate) {
        let mut changed = false;
        {
            let mut schedule = self.schedule.lock();
            for consumed in &update.consumed {
                if schedule.unregister(&consumed.reference) {
                    debug!(state = %consumed.reference, tx_id = %update.tx_id.short(), "scheduled activity cancelled");
                    changed = true;
                }
            }
            for produced in &update.produced {
                if let Some(activity) = self.activity_for(produced) {
                    debug!(state = %produced.reference, at = %activity.at, "activity scheduled");
                    schedule.register(activity);
                    changed = true;
                }
            }
        }
        if changed {
            self.wake.notify_one();
        }
    }

    async fn listen(self: Arc<Self>, mut updates: tokio::sync::broadcast::Receiver<VaultUpdate>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) => self.apply(&update),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(party = %self.node.party(), skipped, "scheduler lagged behind vault updates, re-deriving");
                        if let Err(e) = self.rederive() {
                            warn!(party = %self.node.party(), error = %e, "failed to re-derive schedule");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn run_timer(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let next = self.next_deadline();
            let sleep_for = next
                .map(|at| duration_until(self.node.clock().now(), at))
                .unwrap_or(IDLE_SLEEP);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for), if next.is_some() => self.fire_due(),
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {
                    debug!(party = %self.node.party(), "expiration timer stopped");
                    break;
                }
            }
        }
    }

    fn fire_due(&self) {
        let due = self.schedule.lock().take_due(self.node.clock().now());
        for activity in due {
            let node = Arc::clone(&self.node);
            let runner = Arc::clone(&self.runner);
            tokio::spawn(async move {
                let reference = activity.reference;
                info!(party = %node.party(), state = %reference, "scheduled activity fired");
                match runner.run(Arc::clone(&node), activity).await {
                    Ok(()) => info!(party = %node.party(), state = %reference, "scheduled activity completed"),
                    Err(e) if e.is_conflict() || matches!(e, FlowError::NotFound(_)) => {
                        debug!(party = %node.party(), state = %reference, error = %e, "scheduled activity discarded")
                    }
                    Err(e) => warn!(party = %node.party(), state = %reference, error = %e, "scheduled activity failed"),
                }
            });
        }
    }
}

impl std::fmt::Debug for ExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationScheduler")
            .field("party", self.node.party())
            .field("pending", &self.pending())
            .finish()
    }
}
