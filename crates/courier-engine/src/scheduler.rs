//! In-process schedule of due attempts.
//!
//! Entries are ordered by due time, then by insertion sequence so that entries
//! due at the same instant run in enqueue order. The `scheduled` map is the
//! authoritative view of what is queued; heap entries that no longer match it
//! are stale and skipped when they surface.
//!
//! The schedule is only populated while this process leads. Leadership changes
//! swap the role and clear the schedule under the same lock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{Clock, LeaseFence};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::leadership::LeaseLost;

/// What the run loop drives: the Manager in production.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    /// Scheduling time, read from the store's clock.
    async fn schedule_now(&self) -> Result<DateTime<Utc>, LeaseLost>;

    /// Execute the attempt for `intent_id` if it is still due.
    async fn run_attempt(&self, intent_id: &str) -> Result<(), LeaseLost>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledAttempt {
    due: DateTime<Utc>,
    sequence: u64,
    intent_id: String,
}

impl Ord for ScheduledAttempt {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest due, then lowest sequence, on top.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ScheduledAttempt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct State {
    heap: BinaryHeap<ScheduledAttempt>,
    /// intent id -> sequence of its live heap entry
    scheduled: HashMap<String, u64>,
    next_sequence: u64,
    fence: Option<LeaseFence>,
}

impl State {
    fn clear(&mut self) {
        self.heap.clear();
        self.scheduled.clear();
    }

    fn is_live(&self, entry: &ScheduledAttempt) -> bool {
        self.scheduled.get(&entry.intent_id) == Some(&entry.sequence)
    }

    /// Drop stale entries from the top of the heap.
    fn settle(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }
}

enum Next {
    Due(String),
    At(DateTime<Utc>),
    Idle,
}

pub struct Scheduler {
    state: Mutex<State>,
    wake: Notify,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("scheduled", &self.len())
            .field("leader", &self.is_leader())
            .finish()
    }
}

impl Scheduler {
    /// `clock` supplies the sleep primitive of the run loop.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Only a cache of the store, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue (or re-queue) `intent_id` for `due`. Ignored unless leading.
    pub fn enqueue(&self, intent_id: &str, due: DateTime<Utc>) -> bool {
        {
            let mut state = self.lock();
            if state.fence.is_none() {
                return false;
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.scheduled.insert(intent_id.to_string(), sequence);
            state.heap.push(ScheduledAttempt {
                due,
                sequence,
                intent_id: intent_id.to_string(),
            });
        }
        self.wake.notify_one();
        true
    }

    pub fn remove(&self, intent_id: &str) -> bool {
        self.lock().scheduled.remove(intent_id).is_some()
    }

    pub fn contains(&self, intent_id: &str) -> bool {
        self.lock().scheduled.contains_key(intent_id)
    }

    pub fn len(&self) -> usize {
        self.lock().scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the schedule, keeping the current role.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_leader(&self) -> bool {
        self.lock().fence.is_some()
    }

    pub fn fence(&self) -> Option<LeaseFence> {
        self.lock().fence.clone()
    }

    /// Switch to leader with an empty schedule.
    pub fn become_leader(&self, fence: LeaseFence) {
        {
            let mut state = self.lock();
            state.clear();
            state.fence = Some(fence);
        }
        self.wake.notify_one();
    }

    /// Switch to follower, dropping the schedule. Returns the fence that was
    /// held, if any.
    pub fn become_follower(&self) -> Option<LeaseFence> {
        let previous = {
            let mut state = self.lock();
            state.clear();
            state.fence.take()
        };
        self.wake.notify_one();
        previous
    }

    /// Pop the earliest entry if it is due at `now`.
    fn next(&self, now: DateTime<Utc>) -> Next {
        let mut state = self.lock();
        state.settle();
        let Some(top) = state.heap.peek() else {
            return Next::Idle;
        };
        if top.due > now {
            return Next::At(top.due);
        }
        match state.heap.pop() {
            Some(entry) => {
                state.scheduled.remove(&entry.intent_id);
                Next::Due(entry.intent_id)
            }
            None => Next::Idle,
        }
    }

    /// Run due attempts until `cancel` fires or the runner reports lease loss.
    ///
    /// Attempts execute on this task, one at a time, without holding the
    /// schedule lock.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        runner: &dyn AttemptRunner,
    ) -> Result<(), LeaseLost> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let now = runner.schedule_now().await?;
            match self.next(now) {
                Next::Due(intent_id) => {
                    debug!(intent_id = %intent_id, "attempt due");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        result = runner.run_attempt(&intent_id) => result?,
                    }
                }
                Next::At(due) => {
                    let delay = (due - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = self.wake.notified() => {}
                        _ = self.clock.sleep(delay) => {}
                    }
                }
                Next::Idle => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }
    }
}
