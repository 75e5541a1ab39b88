//! SQLite-backed [`Store`].
//!
//! One connection behind a mutex per process; several processes may share the
//! same database file (WAL journal plus a busy timeout). Every fenced write
//! runs in an immediate transaction that first re-reads the lease row.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use courier_core::{
    Attempt, Clock, CourierError, ExhaustedReason, GatewayOutcome, IdempotencyConflict,
    IntentRecord, IntentStatus, LeaseConfig, LeaseFence, LeaseRecord, NewIntent, Result,
    TargetContract, WebhookState, WebhookStatus,
};

use crate::store::{
    AttemptWrite, ExecutionCandidate, InsertOutcome, ScheduleCursor, ScheduleEntry,
    ScheduleSnapshot, Store, WriteOutcome,
};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const INTENT_COLUMNS: &str = "intent_id, submission_target, contract_json, payload_json, payload_hash, \
     status, final_status, final_reason, exhausted_reason, \
     webhook_status, webhook_last_attempt_at_ms, webhook_delivered_at_ms, webhook_last_error, \
     attempt_count, created_at_ms, completed_at_ms, next_attempt_at_ms, last_modified_ms";

/// Relational store on SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("explicit_clock", &self.clock.is_some())
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| driver("open sqlite store", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| driver("set busy timeout", e))?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))
            .map_err(|e| driver("enable wal", e))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, for tests and single-process use.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| driver("open sqlite store", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Use `clock` instead of the database clock for [`Store::now`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS intents (
              intent_id TEXT PRIMARY KEY,
              submission_target TEXT NOT NULL,
              gateway_type TEXT NOT NULL,
              policy TEXT NOT NULL,
              contract_json TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              payload_hash TEXT NOT NULL,
              status TEXT NOT NULL,
              final_status TEXT NULL,
              final_reason TEXT NULL,
              exhausted_reason TEXT NULL,
              webhook_status TEXT NOT NULL,
              webhook_last_attempt_at_ms INTEGER NULL,
              webhook_delivered_at_ms INTEGER NULL,
              webhook_last_error TEXT NULL,
              attempt_count INTEGER NOT NULL,
              created_at_ms INTEGER NOT NULL,
              completed_at_ms INTEGER NULL,
              next_attempt_at_ms INTEGER NULL,
              last_modified_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attempts (
              intent_id TEXT NOT NULL,
              attempt_number INTEGER NOT NULL,
              started_at_ms INTEGER NOT NULL,
              finished_at_ms INTEGER NOT NULL,
              outcome_status TEXT NULL,
              outcome_reason TEXT NULL,
              error TEXT NULL,
              PRIMARY KEY (intent_id, attempt_number)
            );
            CREATE TABLE IF NOT EXISTS leases (
              lease_name TEXT PRIMARY KEY,
              holder_id TEXT NOT NULL,
              lease_epoch INTEGER NOT NULL,
              acquired_at_ms INTEGER NOT NULL,
              renewed_at_ms INTEGER NOT NULL,
              expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_intents_due ON intents(status, next_attempt_at_ms);
            CREATE INDEX IF NOT EXISTS idx_intents_modified ON intents(last_modified_ms, intent_id);
            CREATE INDEX IF NOT EXISTS idx_intents_webhook ON intents(webhook_status, status);
            "#,
        )
        .map_err(|e| driver("init sqlite schema", e))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CourierError::store("sqlite store lock poisoned"))
    }

    /// Run `f` against the connection on the blocking pool, so a busy
    /// database never stalls a runtime worker.
    async fn interact<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore, &mut Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.lock()?;
            f(&store, &mut conn)
        })
        .await
        .map_err(|e| CourierError::store(format!("sqlite task failed: {}", e)))?
    }

    fn now_ms(&self, conn: &Connection) -> Result<i64> {
        match &self.clock {
            Some(clock) => Ok(dt_to_ms(clock.now())),
            None => conn
                .query_row(
                    "SELECT CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| driver("read database clock", e)),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn now(&self) -> Result<DateTime<Utc>> {
        self.interact(|store, conn| store.now_ms(conn).map(ms_to_dt))
            .await
    }

    async fn insert_intent(
        &self,
        intent: &NewIntent,
        contract: &TargetContract,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let contract_json = serde_json::to_string(contract)?;
        let payload_json = serde_json::to_string(&intent.payload)?;
        let fresh = IntentRecord::pending(
            intent,
            contract.clone(),
            payload_hash.to_string(),
            ms_to_dt(dt_to_ms(now)),
        );
        let intent = intent.clone();
        let contract = contract.clone();
        let payload_hash = payload_hash.to_string();

        self.interact(move |_, conn| {
            let (intent, contract, payload_hash) = (&intent, &contract, payload_hash.as_str());
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| driver("begin insert intent tx", e))?;
            let stamp = next_stamp(&tx, dt_to_ms(now))?;
            let insert = tx.execute(
                "INSERT INTO intents
                 (intent_id, submission_target, gateway_type, policy, contract_json, payload_json,
                  payload_hash, status, webhook_status, attempt_count, created_at_ms,
                  next_attempt_at_ms, last_modified_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10, ?11)",
                params![
                    intent.intent_id,
                    intent.submission_target,
                    contract.gateway_type,
                    contract.policy.as_str(),
                    contract_json,
                    payload_json,
                    payload_hash,
                    IntentStatus::Pending.as_str(),
                    fresh.webhook.status.as_str(),
                    dt_to_ms(now),
                    stamp,
                ],
            );
            match insert {
                Ok(_) => {
                    tx.commit().map_err(|e| driver("commit insert intent tx", e))?;
                    Ok(InsertOutcome {
                        intent: IntentRecord {
                            last_modified_at: ms_to_dt(stamp),
                            ..fresh
                        },
                        existed: false,
                    })
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    let existing = query_intent(&tx, &intent.intent_id)?.ok_or_else(|| {
                        CourierError::store(format!(
                            "intent {} vanished after uniqueness conflict",
                            intent.intent_id
                        ))
                    })?;
                    if existing.matches_submission(intent, payload_hash) {
                        debug!(intent_id = %intent.intent_id, "idempotent submission hit");
                        Ok(InsertOutcome {
                            intent: existing,
                            existed: true,
                        })
                    } else {
                        Err(CourierError::IdempotencyConflict(Box::new(IdempotencyConflict {
                            intent_id: intent.intent_id.clone(),
                            existing_target: existing.submission_target,
                            incoming_target: intent.submission_target.clone(),
                            existing_payload: existing.payload,
                            incoming_payload: intent.payload.clone(),
                            existing_payload_hash: existing.payload_hash,
                            incoming_payload_hash: payload_hash.to_string(),
                            existing_status: existing.status,
                        })))
                    }
                }
                Err(e) => Err(driver("insert intent", e)),
            }
        })
        .await
    }

    async fn load_intent(&self, intent_id: &str) -> Result<Option<IntentRecord>> {
        let intent_id = intent_id.to_string();
        self.interact(move |_, conn| {
            let intent_id = intent_id.as_str();
            let Some(mut intent) = query_intent(conn, intent_id)? else {
                return Ok(None);
            };
            intent.attempts = query_attempts(conn, intent_id)?;
            Ok(Some(intent))
        })
        .await
    }

    async fn load_intent_row(&self, intent_id: &str) -> Result<Option<IntentRecord>> {
        let intent_id = intent_id.to_string();
        self.interact(move |_, conn| query_intent(conn, &intent_id))
            .await
    }

    async fn load_intent_for_execution(
        &self,
        intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionCandidate>> {
        let intent_id = intent_id.to_string();
        self.interact(move |_, conn| {
            let intent_id = intent_id.as_str();
            let Some(intent) = query_intent(conn, intent_id)? else {
                return Ok(None);
            };
            let due = match (intent.status, intent.next_attempt_at) {
                (IntentStatus::Pending, Some(next)) => next <= now,
                _ => false,
            };
            if !due {
                return Ok(None);
            }
            Ok(Some(ExecutionCandidate {
                attempt_count: intent.attempt_count,
                intent,
            }))
        })
        .await
    }

    async fn record_attempt(
        &self,
        fence: &LeaseFence,
        write: &AttemptWrite,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let fence = fence.clone();
        let write = write.clone();
        self.interact(move |_, conn| {
            let (fence, write) = (&fence, &write);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| driver("begin record attempt tx", e))?;
            if !fence_holds(&tx, fence)? {
                warn!(intent_id = %write.intent_id, fence = %fence, "record attempt rejected by fence");
                return Ok(WriteOutcome::Fenced);
            }

            let Some((status, attempt_count)) = pending_state(&tx, &write.intent_id)? else {
                return Err(CourierError::NotFound {
                    resource_type: "intent".to_string(),
                    id: write.intent_id.clone(),
                });
            };
            if status != IntentStatus::Pending || write.attempt.number != attempt_count + 1 {
                return Ok(WriteOutcome::NotPending);
            }

            let attempt = &write.attempt;
            tx.execute(
                "INSERT INTO attempts
                 (intent_id, attempt_number, started_at_ms, finished_at_ms, outcome_status, outcome_reason, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    write.intent_id,
                    attempt.number as i64,
                    dt_to_ms(attempt.started_at),
                    dt_to_ms(attempt.finished_at),
                    attempt.gateway_outcome.as_ref().map(|o| o.status.as_str()),
                    attempt.gateway_outcome.as_ref().map(|o| o.reason.as_str()),
                    attempt.error,
                ],
            )
            .map_err(|e| driver("insert attempt", e))?;

            let terminal = write.status.is_terminal();
            let next_attempt_at = if terminal {
                None
            } else {
                write.next_attempt_at.map(dt_to_ms)
            };
            let completed_at = terminal.then(|| dt_to_ms(now));
            let stamp = next_stamp(&tx, dt_to_ms(now))?;
            tx.execute(
                "UPDATE intents
                 SET status = ?2, final_status = ?3, final_reason = ?4, exhausted_reason = ?5,
                     attempt_count = ?6, next_attempt_at_ms = ?7, completed_at_ms = ?8,
                     last_modified_ms = ?9
                 WHERE intent_id = ?1",
                params![
                    write.intent_id,
                    write.status.as_str(),
                    write.final_outcome.as_ref().map(|o| o.status.as_str()),
                    write.final_outcome.as_ref().map(|o| o.reason.as_str()),
                    write.exhausted_reason.map(|r| r.as_str()),
                    attempt.number as i64,
                    next_attempt_at,
                    completed_at,
                    stamp,
                ],
            )
            .map_err(|e| driver("update intent after attempt", e))?;

            tx.commit().map_err(|e| driver("commit record attempt tx", e))?;
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn mark_exhausted(
        &self,
        fence: &LeaseFence,
        intent_id: &str,
        reason: ExhaustedReason,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let fence = fence.clone();
        let intent_id = intent_id.to_string();
        self.interact(move |_, conn| {
            let (fence, intent_id) = (&fence, intent_id.as_str());
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| driver("begin mark exhausted tx", e))?;
            if !fence_holds(&tx, fence)? {
                warn!(intent_id = %intent_id, fence = %fence, "mark exhausted rejected by fence");
                return Ok(WriteOutcome::Fenced);
            }
            let stamp = next_stamp(&tx, dt_to_ms(now))?;
            let updated = tx
                .execute(
                    "UPDATE intents
                     SET status = ?2, exhausted_reason = ?3, next_attempt_at_ms = NULL,
                         completed_at_ms = ?4, last_modified_ms = ?5
                     WHERE intent_id = ?1 AND status = 'pending'",
                    params![
                        intent_id,
                        IntentStatus::Exhausted.as_str(),
                        reason.as_str(),
                        dt_to_ms(now),
                        stamp,
                    ],
                )
                .map_err(|e| driver("mark exhausted", e))?;
            if updated == 0 {
                return Ok(WriteOutcome::NotPending);
            }
            tx.commit().map_err(|e| driver("commit mark exhausted tx", e))?;
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn record_webhook_attempt(
        &self,
        fence: &LeaseFence,
        intent_id: &str,
        status: WebhookStatus,
        attempted_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<WriteOutcome> {
        if !matches!(status, WebhookStatus::Delivered | WebhookStatus::Failed) {
            return Err(CourierError::Internal(format!(
                "webhook status {} is not a delivery result",
                status
            )));
        }
        let fence = fence.clone();
        let intent_id = intent_id.to_string();
        let error = error.map(str::to_string);
        self.interact(move |_, conn| {
            let (fence, intent_id, error) = (&fence, intent_id.as_str(), error.as_deref());
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| driver("begin record webhook tx", e))?;
            if !fence_holds(&tx, fence)? {
                warn!(intent_id = %intent_id, fence = %fence, "webhook result rejected by fence");
                return Ok(WriteOutcome::Fenced);
            }
            let attempted_ms = dt_to_ms(attempted_at);
            let delivered_ms = (status == WebhookStatus::Delivered).then_some(attempted_ms);
            let updated = tx
                .execute(
                    "UPDATE intents
                     SET webhook_status = ?2, webhook_last_attempt_at_ms = ?3,
                         webhook_delivered_at_ms = ?4, webhook_last_error = ?5
                     WHERE intent_id = ?1 AND webhook_status = 'pending'",
                    params![intent_id, status.as_str(), attempted_ms, delivered_ms, error],
                )
                .map_err(|e| driver("record webhook attempt", e))?;
            if updated == 0 {
                return Ok(WriteOutcome::NotPending);
            }
            tx.commit().map_err(|e| driver("commit record webhook tx", e))?;
            Ok(WriteOutcome::Applied)
        })
        .await
    }

    async fn load_pending_webhooks(&self) -> Result<Vec<String>> {
        self.interact(move |_, conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT intent_id FROM intents
                     WHERE webhook_status = 'pending' AND status != 'pending'
                     ORDER BY completed_at_ms, intent_id",
                )
                .map_err(|e| driver("prepare pending webhooks", e))?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(|e| driver("query pending webhooks", e))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(map_sqlite_err)?);
            }
            Ok(ids)
        })
        .await
    }

    async fn load_schedule_snapshot(&self) -> Result<ScheduleSnapshot> {
        self.interact(move |_, conn| {
            let tx = conn
                .transaction()
                .map_err(|e| driver("begin schedule snapshot tx", e))?;
            let entries = query_schedule(
                &tx,
                "SELECT intent_id, next_attempt_at_ms, status, last_modified_ms FROM intents
                 WHERE status = 'pending' AND next_attempt_at_ms IS NOT NULL
                 ORDER BY last_modified_ms, intent_id",
                params![],
            )?;
            let cursor = tx
                .query_row(
                    "SELECT last_modified_ms, intent_id FROM intents
                     ORDER BY last_modified_ms DESC, intent_id DESC LIMIT 1",
                    [],
                    |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(|e| driver("read schedule cursor", e))?
                .map(|(modified_ms, intent_id)| ScheduleCursor {
                    modified_at: ms_to_dt(modified_ms),
                    intent_id,
                })
                .unwrap_or_else(ScheduleCursor::origin);
            tx.commit().map_err(|e| driver("commit schedule snapshot tx", e))?;
            Ok(ScheduleSnapshot { entries, cursor })
        })
        .await
    }

    async fn load_schedule_changes(&self, cursor: &ScheduleCursor) -> Result<Vec<ScheduleEntry>> {
        let cursor = cursor.clone();
        self.interact(move |_, conn| {
            query_schedule(
                conn,
                "SELECT intent_id, next_attempt_at_ms, status, last_modified_ms FROM intents
                 WHERE last_modified_ms > ?1 OR (last_modified_ms = ?1 AND intent_id > ?2)
                 ORDER BY last_modified_ms, intent_id",
                params![dt_to_ms(cursor.modified_at), cursor.intent_id],
            )
        })
        .await
    }

    async fn acquire_lease(&self, config: &LeaseConfig) -> Result<Option<LeaseRecord>> {
        let config = config.clone();
        self.interact(move |store, conn| {
            let config = &config;
            let now = store.now_ms(conn)?;
            let expires = now + config.duration.num_milliseconds();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| driver("begin acquire lease tx", e))?;

            let taken_over = tx
                .execute(
                    "UPDATE leases
                     SET holder_id = ?2, lease_epoch = lease_epoch + 1,
                         acquired_at_ms = ?3, renewed_at_ms = ?3, expires_at_ms = ?4
                     WHERE lease_name = ?1 AND expires_at_ms <= ?3",
                    params![config.lease_name, config.holder_id, now, expires],
                )
                .map_err(|e| driver("take over expired lease", e))?;

            if taken_over == 0 {
                let insert = tx.execute(
                    "INSERT INTO leases
                     (lease_name, holder_id, lease_epoch, acquired_at_ms, renewed_at_ms, expires_at_ms)
                     VALUES (?1, ?2, 1, ?3, ?3, ?4)",
                    params![config.lease_name, config.holder_id, now, expires],
                );
                match insert {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        return Ok(None);
                    }
                    Err(e) => return Err(driver("insert lease", e)),
                }
            }

            let lease = query_lease(&tx, &config.lease_name)?;
            tx.commit().map_err(|e| driver("commit acquire lease tx", e))?;
            Ok(lease)
        })
        .await
    }

    async fn renew_lease(
        &self,
        config: &LeaseConfig,
        lease_epoch: u64,
    ) -> Result<Option<LeaseRecord>> {
        let config = config.clone();
        self.interact(move |store, conn| {
            let config = &config;
            let now = store.now_ms(conn)?;
            let updated = conn
                .execute(
                    "UPDATE leases SET renewed_at_ms = ?4, expires_at_ms = ?5
                     WHERE lease_name = ?1 AND holder_id = ?2 AND lease_epoch = ?3",
                    params![
                        config.lease_name,
                        config.holder_id,
                        lease_epoch as i64,
                        now,
                        now + config.duration.num_milliseconds(),
                    ],
                )
                .map_err(|e| driver("renew lease", e))?;
            if updated == 0 {
                return Ok(None);
            }
            query_lease(conn, &config.lease_name)
        })
        .await
    }

    async fn release_lease(&self, fence: &LeaseFence) -> Result<bool> {
        let fence = fence.clone();
        self.interact(move |store, conn| {
            let now = store.now_ms(conn)?;
            let updated = conn
                .execute(
                    "UPDATE leases SET expires_at_ms = ?4
                     WHERE lease_name = ?1 AND holder_id = ?2 AND lease_epoch = ?3
                       AND expires_at_ms > ?4",
                    params![fence.lease_name, fence.holder_id, fence.lease_epoch as i64, now],
                )
                .map_err(|e| driver("release lease", e))?;
            Ok(updated > 0)
        })
        .await
    }

    async fn read_lease(&self, lease_name: &str) -> Result<Option<LeaseRecord>> {
        let lease_name = lease_name.to_string();
        self.interact(move |_, conn| query_lease(conn, &lease_name))
            .await
    }
}

fn query_intent(conn: &Connection, intent_id: &str) -> Result<Option<IntentRecord>> {
    let sql = format!("SELECT {} FROM intents WHERE intent_id = ?1", INTENT_COLUMNS);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| driver("prepare load intent", e))?;
    let mut rows = stmt
        .query(params![intent_id])
        .map_err(|e| driver("query load intent", e))?;
    match rows.next().map_err(|e| driver("scan load intent", e))? {
        Some(row) => Ok(Some(read_intent(row)?)),
        None => Ok(None),
    }
}

fn read_intent(row: &rusqlite::Row<'_>) -> Result<IntentRecord> {
    let contract_json: String = row.get(2).map_err(map_sqlite_err)?;
    let payload_json: String = row.get(3).map_err(map_sqlite_err)?;
    let status: String = row.get(5).map_err(map_sqlite_err)?;
    let final_status: Option<String> = row.get(6).map_err(map_sqlite_err)?;
    let final_reason: Option<String> = row.get(7).map_err(map_sqlite_err)?;
    let exhausted_reason: Option<String> = row.get(8).map_err(map_sqlite_err)?;
    let webhook_status: String = row.get(9).map_err(map_sqlite_err)?;

    Ok(IntentRecord {
        intent_id: row.get(0).map_err(map_sqlite_err)?,
        submission_target: row.get(1).map_err(map_sqlite_err)?,
        contract: serde_json::from_str(&contract_json)?,
        payload: serde_json::from_str(&payload_json)?,
        payload_hash: row.get(4).map_err(map_sqlite_err)?,
        status: IntentStatus::from_str(&status)?,
        final_outcome: final_status.map(|status| GatewayOutcome {
            status,
            reason: final_reason.unwrap_or_default(),
        }),
        exhausted_reason: exhausted_reason
            .as_deref()
            .map(ExhaustedReason::from_str)
            .transpose()?,
        webhook: WebhookState {
            status: WebhookStatus::from_str(&webhook_status)?,
            last_attempt_at: opt_ms_to_dt(row.get(10).map_err(map_sqlite_err)?),
            delivered_at: opt_ms_to_dt(row.get(11).map_err(map_sqlite_err)?),
            last_error: row.get(12).map_err(map_sqlite_err)?,
        },
        attempt_count: row.get::<_, i64>(13).map_err(map_sqlite_err)? as u32,
        created_at: ms_to_dt(row.get(14).map_err(map_sqlite_err)?),
        completed_at: opt_ms_to_dt(row.get(15).map_err(map_sqlite_err)?),
        next_attempt_at: opt_ms_to_dt(row.get(16).map_err(map_sqlite_err)?),
        last_modified_at: ms_to_dt(row.get(17).map_err(map_sqlite_err)?),
        attempts: Vec::new(),
    })
}

fn query_attempts(conn: &Connection, intent_id: &str) -> Result<Vec<Attempt>> {
    let mut stmt = conn
        .prepare(
            "SELECT attempt_number, started_at_ms, finished_at_ms, outcome_status, outcome_reason, error
             FROM attempts WHERE intent_id = ?1 ORDER BY attempt_number",
        )
        .map_err(|e| driver("prepare load attempts", e))?;
    let rows = stmt
        .query_map(params![intent_id], |r| {
            let outcome_status: Option<String> = r.get(3)?;
            let outcome_reason: Option<String> = r.get(4)?;
            Ok(Attempt {
                number: r.get::<_, i64>(0)? as u32,
                started_at: ms_to_dt(r.get(1)?),
                finished_at: ms_to_dt(r.get(2)?),
                gateway_outcome: outcome_status.map(|status| GatewayOutcome {
                    status,
                    reason: outcome_reason.unwrap_or_default(),
                }),
                error: r.get(5)?,
            })
        })
        .map_err(|e| driver("query load attempts", e))?;
    let mut attempts = Vec::new();
    for row in rows {
        attempts.push(row.map_err(map_sqlite_err)?);
    }
    Ok(attempts)
}

fn query_schedule(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ScheduleEntry>> {
    let mut stmt = conn.prepare(sql).map_err(|e| driver("prepare schedule read", e))?;
    let rows = stmt
        .query_map(params, |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<i64>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .map_err(|e| driver("query schedule read", e))?;
    let mut entries = Vec::new();
    for row in rows {
        let (intent_id, next_ms, status, modified_ms) = row.map_err(map_sqlite_err)?;
        entries.push(ScheduleEntry {
            intent_id,
            next_attempt_at: opt_ms_to_dt(next_ms),
            status: IntentStatus::from_str(&status)?,
            modified_at: ms_to_dt(modified_ms),
        });
    }
    Ok(entries)
}

fn pending_state(conn: &Connection, intent_id: &str) -> Result<Option<(IntentStatus, u32)>> {
    let row = conn
        .query_row(
            "SELECT status, attempt_count FROM intents WHERE intent_id = ?1",
            params![intent_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(|e| driver("read intent state", e))?;
    match row {
        Some((status, count)) => Ok(Some((IntentStatus::from_str(&status)?, count as u32))),
        None => Ok(None),
    }
}

fn query_lease(conn: &Connection, lease_name: &str) -> Result<Option<LeaseRecord>> {
    conn.query_row(
        "SELECT lease_name, holder_id, lease_epoch, acquired_at_ms, renewed_at_ms, expires_at_ms
         FROM leases WHERE lease_name = ?1",
        params![lease_name],
        |r| {
            Ok(LeaseRecord {
                lease_name: r.get(0)?,
                holder_id: r.get(1)?,
                lease_epoch: r.get::<_, i64>(2)? as u64,
                acquired_at: ms_to_dt(r.get(3)?),
                renewed_at: ms_to_dt(r.get(4)?),
                expires_at: ms_to_dt(r.get(5)?),
            })
        },
    )
    .optional()
    .map_err(|e| driver("read lease", e))
}

/// Whether the lease row still carries the fence's holder and epoch.
fn fence_holds(conn: &Connection, fence: &LeaseFence) -> Result<bool> {
    Ok(query_lease(conn, &fence.lease_name)?
        .map(|lease| fence.matches(&lease))
        .unwrap_or(false))
}

/// Modification stamp for the next intent write. Strictly greater than every
/// stamp already stored, so the schedule cursor never skips a write.
fn next_stamp(conn: &Connection, now_ms: i64) -> Result<i64> {
    let max: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(last_modified_ms), 0) FROM intents",
            [],
            |r| r.get(0),
        )
        .map_err(|e| driver("read modification stamp", e))?;
    Ok(now_ms.max(max + 1))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn opt_ms_to_dt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(ms_to_dt)
}

fn driver(context: &str, err: rusqlite::Error) -> CourierError {
    CourierError::store(format!("{}: {}", context, err))
}

fn map_sqlite_err(err: rusqlite::Error) -> CourierError {
    CourierError::store(format!("sqlite store: {}", err))
}
