use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::classifier::RetryReason;
use crate::due::DueQueue;
use crate::error::{DispatchError, DispatchResult};
use crate::retry::entry::{RetryEntry, RetryStatus};
use crate::retry::policy::RetryPolicySet;
use crate::types::{RetryId, TaskEvent, TaskPriority};

/// Outcome of one retry attempt, reported back by the dispatcher
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The attempt succeeded, optionally carrying the execution result
    Success(Option<Value>),

    /// The attempt failed with the given error message
    Failure(String),
}

/// Snapshot of retry engine state for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub pending: usize,
    pub retrying: usize,
    pub success: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub scheduled: usize,
}

struct EngineState {
    entries: HashMap<RetryId, RetryEntry>,
    by_request: HashMap<String, RetryId>,
    due: DueQueue<RetryId>,
}

/// Tracks failed trade executions and schedules their re-submission.
///
/// Entries wait in a time-ordered due-queue rather than inside sleeping
/// futures; the dispatcher's idle tick drains whatever has become eligible
/// and converts it into a fresh task submission. Cancellation therefore
/// takes effect without waking anything up - a canceled entry popped from
/// the heap is discarded.
pub struct RetryEngine {
    state: Mutex<EngineState>,
    policies: RetryPolicySet,
    events: Option<broadcast::Sender<TaskEvent>>,
}

impl RetryEngine {
    /// Create an engine with the given policy table
    pub fn new(policies: RetryPolicySet) -> Self {
        Self {
            state: Mutex::new(EngineState {
                entries: HashMap::new(),
                by_request: HashMap::new(),
                due: DueQueue::new(),
            }),
            policies,
            events: None,
        }
    }

    /// Create an engine that publishes onto a shared event channel
    pub fn with_events(policies: RetryPolicySet, events: broadcast::Sender<TaskEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(policies)
        }
    }

    /// Record a failed execution, creating or re-arming the entry keyed by
    /// the caller-supplied request identity.
    ///
    /// Idempotent per `request_id`: repeated reports against a live entry
    /// append to its error history instead of creating duplicates. A new
    /// entry is created only when none exists or the previous one is
    /// terminal.
    pub fn add_failed_execution(
        &self,
        request_id: impl Into<String>,
        task_type: impl Into<String>,
        request: Value,
        priority: TaskPriority,
        reason: RetryReason,
        error: impl Into<String>,
    ) -> RetryId {
        let request_id = request_id.into();
        let error = error.into();
        let mut state = self.state.lock();

        // Reuse the live entry for this request, if any
        if let Some(retry_id) = state.by_request.get(&request_id).cloned() {
            let live = state
                .entries
                .get(&retry_id)
                .map(|e| !e.status.is_terminal())
                .unwrap_or(false);
            if live {
                self.record_failure_locked(&mut state, &retry_id, error);
                return retry_id;
            }
        }

        let policy = self.policies.policy_for(reason).clone();
        let entry = RetryEntry::new(
            request_id.clone(),
            task_type.into(),
            request,
            priority,
            reason,
            policy,
        );
        let retry_id = entry.id.clone();
        debug!(retry_id = %retry_id, request_id = %request_id, reason = %reason, "created retry entry");

        state.by_request.insert(request_id, retry_id.clone());
        state.entries.insert(retry_id.clone(), entry);
        self.record_failure_locked(&mut state, &retry_id, error);
        retry_id
    }

    /// Record the outcome of an attempt.
    ///
    /// An outcome arriving after the entry went terminal (canceled or
    /// exhausted while the attempt was in flight) is still recorded - a
    /// failure extends the error history, a success stores its result -
    /// but the status never changes and no further retry is scheduled.
    pub fn mark_attempt(&self, retry_id: &RetryId, outcome: AttemptOutcome) -> DispatchResult<()> {
        let mut state = self.state.lock();
        let terminal = state
            .entries
            .get(retry_id)
            .map(|e| e.status.is_terminal())
            .ok_or_else(|| DispatchError::RetryNotFound(retry_id.to_string()))?;

        if terminal {
            if let Some(entry) = state.entries.get_mut(retry_id) {
                entry.last_attempt_at = Some(Utc::now());
                match outcome {
                    AttemptOutcome::Success(result) => entry.final_result = result,
                    AttemptOutcome::Failure(error) => entry.error_history.push(error),
                }
            }
            return Ok(());
        }

        match outcome {
            AttemptOutcome::Success(result) => {
                if let Some(entry) = state.entries.get_mut(retry_id) {
                    entry.succeed(result);
                    info!(retry_id = %retry_id, attempts = entry.attempts, "retry succeeded");
                }
            }
            AttemptOutcome::Failure(error) => {
                self.record_failure_locked(&mut state, retry_id, error);
            }
        }
        Ok(())
    }

    /// Cancel a retry entry.
    ///
    /// Returns `true` if the entry transitioned to abandoned, `false` if it
    /// was already terminal or does not exist. Safe to call repeatedly.
    pub fn cancel(&self, retry_id: &RetryId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(retry_id) else {
            return false;
        };
        if !entry.abandon() {
            return false;
        }
        info!(retry_id = %retry_id, "retry abandoned");
        self.emit(TaskEvent::RetryAbandoned {
            retry_id: retry_id.clone(),
            at: Utc::now(),
        });
        true
    }

    /// Get a snapshot of a retry entry
    pub fn get(&self, retry_id: &RetryId) -> Option<RetryEntry> {
        self.state.lock().entries.get(retry_id).cloned()
    }

    /// Get a snapshot of the live entry for a request identity
    pub fn get_by_request(&self, request_id: &str) -> Option<RetryEntry> {
        let state = self.state.lock();
        let retry_id = state.by_request.get(request_id)?;
        state.entries.get(retry_id).cloned()
    }

    /// Evict a terminal entry once the caller has persisted its outcome.
    ///
    /// Returns `false` if the entry is missing or still live.
    pub fn mark_synced(&self, retry_id: &RetryId) -> bool {
        let mut state = self.state.lock();
        let terminal = state
            .entries
            .get(retry_id)
            .map(|e| e.status.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return false;
        }
        if let Some(entry) = state.entries.remove(retry_id) {
            state.by_request.remove(&entry.request_id);
        }
        true
    }

    /// Drain every entry whose scheduled time has arrived, transitioning
    /// each to retrying and returning a snapshot for re-submission.
    ///
    /// Canceled or re-armed entries popped from the heap are stale and
    /// skipped.
    pub fn due_entries(&self) -> Vec<RetryEntry> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let due_ids = state.due.drain_due(now);

        let mut due = Vec::new();
        for retry_id in due_ids {
            let Some(entry) = state.entries.get_mut(&retry_id) else {
                continue;
            };
            // Stale heap slot: entry canceled, finished, or rescheduled
            // further into the future since this slot was pushed
            if entry.status != RetryStatus::Pending {
                continue;
            }
            if entry.next_retry_at.map(|at| at > now).unwrap_or(true) {
                continue;
            }
            entry.begin_attempt();
            due.push(entry.clone());
        }
        due
    }

    /// Remove terminal entries older than the retention window.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep_terminal(&self, retention: std::time::Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut state = self.state.lock();

        let expired: Vec<RetryId> = state
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.status.is_terminal()
                    && entry.last_attempt_at.unwrap_or(entry.created_at) < cutoff
            })
            .map(|(id, _)| id.clone())
            .collect();

        for retry_id in &expired {
            if let Some(entry) = state.entries.remove(retry_id) {
                state.by_request.remove(&entry.request_id);
            }
        }
        expired.len()
    }

    /// Count entries per status plus the due-queue depth
    pub fn stats(&self) -> RetryStats {
        let state = self.state.lock();
        let mut stats = RetryStats {
            scheduled: state.due.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            match entry.status {
                RetryStatus::Pending => stats.pending += 1,
                RetryStatus::Retrying => stats.retrying += 1,
                RetryStatus::Success => stats.success += 1,
                RetryStatus::Failed => stats.failed += 1,
                RetryStatus::Abandoned => stats.abandoned += 1,
            }
        }
        stats
    }

    fn record_failure_locked(&self, state: &mut EngineState, retry_id: &RetryId, error: String) {
        let Some(entry) = state.entries.get_mut(retry_id) else {
            return;
        };
        entry.record_failure(error);

        match entry.status {
            RetryStatus::Pending => {
                if let Some(retry_at) = entry.next_retry_at {
                    debug!(
                        retry_id = %retry_id,
                        attempts = entry.attempts,
                        retry_at = %retry_at,
                        "retry re-armed"
                    );
                    state.due.push(retry_id.clone(), retry_at);
                }
            }
            RetryStatus::Failed => {
                warn!(
                    retry_id = %retry_id,
                    attempts = entry.attempts,
                    "retry attempts exhausted"
                );
                self.emit(TaskEvent::RetryExhausted {
                    retry_id: retry_id.clone(),
                    at: Utc::now(),
                });
            }
            _ => {}
        }
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Test helpers for deterministic scheduling without real delays
impl RetryEngine {
    /// Pull an entry's scheduled time into the past so the next
    /// `due_entries` call picks it up (test helper)
    pub fn force_due(&self, retry_id: &RetryId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(retry_id) else {
            return false;
        };
        if entry.status != RetryStatus::Pending {
            return false;
        }
        let past = Utc::now() - chrono::Duration::seconds(1);
        entry.next_retry_at = Some(past);
        state.due.push(retry_id.clone(), past);
        true
    }
}
