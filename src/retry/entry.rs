use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::RetryReason;
use crate::retry::policy::RetryPolicy;
use crate::types::{RetryId, TaskPriority};

/// Retry entry status lifecycle
///
/// `Pending -> Retrying -> {Success | Pending (re-armed) | Failed}`;
/// `Pending | Retrying -> Abandoned` via explicit cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStatus {
    /// Waiting for `next_retry_at` to arrive
    Pending,

    /// An attempt is currently in flight
    Retrying,

    /// An attempt succeeded
    Success,

    /// Attempt cap reached with the last attempt failing
    Failed,

    /// Canceled by the caller - never resumes
    Abandoned,
}

impl RetryStatus {
    /// Check if the entry is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Abandoned)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Tracks one logical trade execution across retry attempts.
///
/// Distinct from a task: a retry spans multiple dispatch cycles and keeps
/// its identity, attempt count, and error history across re-submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Stable retry identifier
    pub id: RetryId,

    /// Caller-supplied identity (e.g. original order id) used for
    /// idempotent creation
    pub request_id: String,

    /// Task type to resubmit the request under
    pub task_type: String,

    /// The original execution request, replayed on each attempt
    pub original_request: Value,

    /// Priority carried over to each resubmitted attempt
    pub priority: TaskPriority,

    /// Why the execution failed, selecting the backoff policy
    pub reason: RetryReason,

    /// Backoff policy snapshot taken at creation
    pub policy: RetryPolicy,

    /// Recorded failures so far
    pub attempts: u32,

    /// Current lifecycle status
    pub status: RetryStatus,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the latest attempt was recorded
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the next attempt becomes eligible; set only while pending
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Ordered record of every failure message - never overwritten
    pub error_history: Vec<String>,

    /// Result of the successful attempt, if any
    pub final_result: Option<Value>,
}

impl RetryEntry {
    /// Create a new entry from its first recorded failure
    pub fn new(
        request_id: String,
        task_type: String,
        original_request: Value,
        priority: TaskPriority,
        reason: RetryReason,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            id: RetryId::new(),
            request_id,
            task_type,
            original_request,
            priority,
            reason,
            policy,
            attempts: 0,
            status: RetryStatus::Pending,
            created_at: Utc::now(),
            last_attempt_at: None,
            next_retry_at: None,
            error_history: Vec::new(),
            final_result: None,
        }
    }

    /// Check if the attempt budget allows another retry
    pub fn can_retry(&self) -> bool {
        self.attempts < self.policy.max_attempts && !self.status.is_terminal()
    }

    /// Record a failed attempt.
    ///
    /// Appends to the error history and either re-arms the entry with a
    /// fresh `next_retry_at` or, once the attempt cap is hit, fails it
    /// terminally and clears the schedule.
    pub fn record_failure(&mut self, error: String) {
        let now = Utc::now();
        self.error_history.push(error);
        self.attempts += 1;
        self.last_attempt_at = Some(now);

        if self.attempts >= self.policy.max_attempts {
            self.status = RetryStatus::Failed;
            self.next_retry_at = None;
        } else {
            self.status = RetryStatus::Pending;
            let delay = self.policy.delay_for(self.attempts);
            self.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        }
    }

    /// Mark the entry as mid-attempt when its scheduled time arrives
    pub fn begin_attempt(&mut self) {
        self.status = RetryStatus::Retrying;
        self.next_retry_at = None;
    }

    /// Record a successful attempt
    pub fn succeed(&mut self, result: Option<Value>) {
        self.status = RetryStatus::Success;
        self.next_retry_at = None;
        self.last_attempt_at = Some(Utc::now());
        self.final_result = result;
    }

    /// Abandon the entry; only valid while pending or retrying
    pub fn abandon(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = RetryStatus::Abandoned;
        self.next_retry_at = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(max_attempts: u32) -> RetryEntry {
        RetryEntry::new(
            "order-5".to_string(),
            "trade_execution".to_string(),
            serde_json::json!({"symbol": "XAUUSD", "volume": 0.1}),
            TaskPriority::Critical,
            RetryReason::Mt5Disconnected,
            RetryPolicy::exponential(Duration::from_secs(5), max_attempts, Duration::from_secs(300)),
        )
    }

    #[test]
    fn failure_rearms_until_cap() {
        let mut e = entry(3);
        e.record_failure("no connection to trade server".to_string());
        assert_eq!(e.status, RetryStatus::Pending);
        assert_eq!(e.attempts, 1);
        assert!(e.next_retry_at.is_some());

        e.record_failure("no connection to trade server".to_string());
        assert_eq!(e.attempts, 2);
        assert!(e.next_retry_at.is_some());

        e.record_failure("no connection to trade server".to_string());
        assert_eq!(e.status, RetryStatus::Failed);
        assert_eq!(e.attempts, 3);
        assert!(e.next_retry_at.is_none());
        assert_eq!(e.error_history.len(), 3);
    }

    #[test]
    fn success_clears_schedule_and_keeps_history() {
        let mut e = entry(3);
        e.record_failure("market closed".to_string());
        e.begin_attempt();
        e.succeed(Some(serde_json::json!({"ticket": 42})));

        assert_eq!(e.status, RetryStatus::Success);
        assert!(e.next_retry_at.is_none());
        assert_eq!(e.error_history, vec!["market closed".to_string()]);
        assert!(e.final_result.is_some());
    }

    #[test]
    fn abandon_only_from_non_terminal() {
        let mut e = entry(3);
        assert!(e.abandon());
        assert_eq!(e.status, RetryStatus::Abandoned);
        assert!(!e.abandon());

        let mut done = entry(1);
        done.record_failure("boom".to_string());
        assert_eq!(done.status, RetryStatus::Failed);
        assert!(!done.abandon());
    }
}
