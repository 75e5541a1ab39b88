//! The submission manager.
//!
//! Owns submission and idempotency, the wait path, schedule rebuild and
//! refresh, attempt execution and webhook dispatch. Followers only persist;
//! the leader also schedules and executes.

mod execute;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Clock, CourierError, IntentRecord, LeaseFence, NewIntent, Result, RetrySettings,
    TargetRegistry,
};
use courier_store::{InsertOutcome, ScheduleCursor, Store};
use tracing::{debug, error, info, warn};

use crate::executor::AttemptExecutor;
use crate::leadership::{LeadershipEnd, LeaseLost};
use crate::metrics;
use crate::scheduler::{AttemptRunner, Scheduler};
use crate::webhook::WebhookSender;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub retry: RetrySettings,
    /// Poll period of [`Manager::wait_for_intent`].
    pub wait_poll_interval: Duration,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            wait_poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(30),
        }
    }
}

pub struct Manager {
    store: Arc<dyn Store>,
    registry: Arc<TargetRegistry>,
    executor: Arc<dyn AttemptExecutor>,
    webhooks: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    config: ManagerConfig,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

impl Manager {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<TargetRegistry>,
        executor: Arc<dyn AttemptExecutor>,
        webhooks: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(clock.clone()),
            store,
            registry,
            executor,
            webhooks,
            clock,
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Persist a submission; on a fresh insert the leader also schedules its
    /// first attempt.
    pub async fn submit_intent(&self, intent: NewIntent) -> Result<InsertOutcome> {
        intent.validate()?;
        let contract = self.registry.resolve(&intent.submission_target)?;
        let payload_hash = intent.payload_hash();
        let now = self.store.now().await?;

        let outcome = match self
            .store
            .insert_intent(&intent, &contract, &payload_hash, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(err @ CourierError::IdempotencyConflict(_)) => {
                warn!(intent_id = %intent.intent_id, error = %err, "idempotency conflict");
                metrics::submission("conflict");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if outcome.existed {
            debug!(intent_id = %intent.intent_id, "returning existing intent");
            metrics::submission("existing");
            return Ok(outcome);
        }

        metrics::submission("created");
        let scheduled = match outcome.intent.next_attempt_at {
            Some(due) => self.scheduler.enqueue(&outcome.intent.intent_id, due),
            None => false,
        };
        info!(
            intent_id = %outcome.intent.intent_id,
            target = %outcome.intent.submission_target,
            scheduled,
            "intent accepted for delivery"
        );
        Ok(outcome)
    }

    /// Snapshot including attempt history.
    pub async fn get_intent(&self, intent_id: &str) -> Result<Option<IntentRecord>> {
        self.store.load_intent(intent_id).await
    }

    pub async fn get_intent_row(&self, intent_id: &str) -> Result<Option<IntentRecord>> {
        self.store.load_intent_row(intent_id).await
    }

    /// Poll until the intent is terminal or its first attempt has finished,
    /// or until `max_wait` (capped by config) elapses.
    ///
    /// Returns the latest row, or `None` if the intent does not exist.
    pub async fn wait_for_intent(
        &self,
        intent_id: &str,
        max_wait: Duration,
    ) -> Result<Option<IntentRecord>> {
        let max_wait = max_wait.min(self.config.max_wait);
        let deadline = self.clock.now()
            + chrono::Duration::from_std(max_wait).unwrap_or_else(|_| chrono::Duration::zero());

        loop {
            let Some(intent) = self.store.load_intent_row(intent_id).await? else {
                return Ok(None);
            };
            if intent.is_terminal() || intent.attempt_count > 0 {
                return Ok(Some(intent));
            }

            let remaining = (deadline - self.clock.now()).to_std().unwrap_or_default();
            if remaining.is_zero() {
                return Ok(Some(intent));
            }
            self.clock
                .sleep(remaining.min(self.config.wait_poll_interval))
                .await;
        }
    }

    pub fn is_leader(&self) -> bool {
        self.scheduler.is_leader()
    }

    pub fn current_fence(&self) -> Option<LeaseFence> {
        self.scheduler.fence()
    }

    /// Take leadership under `fence`: rebuild the schedule from the store and
    /// re-dispatch webhooks a previous leader left pending.
    ///
    /// Returns the cursor for subsequent refreshes.
    pub async fn become_leader(
        &self,
        fence: LeaseFence,
    ) -> std::result::Result<ScheduleCursor, LeaseLost> {
        info!(fence = %fence, "becoming leader");
        self.scheduler.become_leader(fence);
        metrics::leadership(true, "acquired");
        let cursor = self.rebuild_schedule().await?;
        self.recover_webhooks().await?;
        Ok(cursor)
    }

    /// Drop to follower and clear the local schedule.
    pub fn demote(&self, reason: LeadershipEnd) {
        if let Some(fence) = self.scheduler.become_follower() {
            warn!(fence = %fence, reason = %reason, "demoted to follower");
            metrics::leadership(false, reason.as_str());
        }
    }

    /// Replace the local schedule with every pending, due-dated intent.
    pub async fn rebuild_schedule(&self) -> std::result::Result<ScheduleCursor, LeaseLost> {
        let snapshot = self.store.load_schedule_snapshot().await.map_err(|err| {
            error!(error = %err, "schedule rebuild failed");
            LeaseLost::new(LeadershipEnd::RebuildFailed)
        })?;

        self.scheduler.clear();
        let mut count = 0usize;
        for entry in &snapshot.entries {
            if let Some(due) = entry.due() {
                if self.scheduler.enqueue(&entry.intent_id, due) {
                    count += 1;
                }
            }
        }
        info!(count, cursor = ?snapshot.cursor, "schedule rebuilt");
        Ok(snapshot.cursor)
    }

    /// Apply rows modified after `cursor` to the local schedule and advance it.
    pub async fn refresh_schedule(
        &self,
        cursor: &mut ScheduleCursor,
    ) -> std::result::Result<usize, LeaseLost> {
        let changes = self.store.load_schedule_changes(cursor).await.map_err(|err| {
            error!(error = %err, "schedule refresh failed");
            LeaseLost::new(LeadershipEnd::RefreshFailed)
        })?;

        for entry in &changes {
            match entry.due() {
                Some(due) => {
                    self.scheduler.enqueue(&entry.intent_id, due);
                }
                None => {
                    self.scheduler.remove(&entry.intent_id);
                }
            }
            cursor.advance(entry);
        }
        if !changes.is_empty() {
            debug!(changes = changes.len(), "schedule refreshed");
        }
        Ok(changes.len())
    }

    /// The store's clock.
    pub async fn schedule_time_now(&self) -> Result<DateTime<Utc>> {
        self.store.now().await
    }
}

#[async_trait]
impl AttemptRunner for Manager {
    async fn schedule_now(&self) -> std::result::Result<DateTime<Utc>, LeaseLost> {
        self.schedule_time_now()
            .await
            .map_err(|err| store_unavailable("read store clock", err))
    }

    async fn run_attempt(&self, intent_id: &str) -> std::result::Result<(), LeaseLost> {
        self.execute_attempt(intent_id).await
    }
}

/// A store failure on the leader path: the outcome of the write is unknown,
/// so leadership is given up.
fn store_unavailable(operation: &str, err: CourierError) -> LeaseLost {
    error!(operation, error = %err, "store unavailable; giving up leadership");
    LeaseLost::new(LeadershipEnd::StoreUnavailable)
}
