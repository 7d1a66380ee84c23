use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RetryId, TaskId, TaskPriority};

/// Task status lifecycle
///
/// Transitions are monotone: a terminal task never becomes pending again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task is queued and waiting to be dispatched
    Pending,

    /// Task is currently being executed by a worker
    Processing,

    /// Task failed and is waiting for its backoff delay to elapse
    Retrying { retry_at: DateTime<Utc> },

    /// Task completed successfully
    Completed,

    /// Task failed permanently (max attempts exceeded or permanent error)
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the task is currently being executed
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying { .. } => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One schedulable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier, assigned at submission
    pub id: TaskId,

    /// Task type key used for worker dispatch
    pub task_type: String,

    /// Opaque payload handed to the worker
    pub payload: Value,

    /// Priority for queue ordering
    pub priority: TaskPriority,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Dispatch attempts so far (incremented when execution starts)
    pub attempts: u32,

    /// Maximum dispatch attempts before the task fails terminally
    pub max_attempts: u32,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When the latest attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Last error message, if any
    pub error: Option<String>,

    /// Worker result on success
    pub result: Option<Value>,

    /// Retry entry this task is an attempt for, if resubmitted by the
    /// retry engine
    pub retry_id: Option<RetryId>,
}

impl Task {
    /// Create a new pending task
    pub fn new(task_type: String, payload: Value, priority: TaskPriority, max_attempts: u32) -> Self {
        Self {
            id: TaskId::new(),
            task_type,
            payload,
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            retry_id: None,
        }
    }

    /// Tie this task to a retry entry
    pub fn with_retry_id(mut self, retry_id: RetryId) -> Self {
        self.retry_id = Some(retry_id);
        self
    }

    /// Check if another dispatch attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts && !self.status.is_terminal()
    }

    /// Begin a dispatch attempt
    pub fn start_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Complete the task successfully
    pub fn complete(&mut self, result: Option<Value>) {
        self.status = TaskStatus::Completed;
        self.result = result;
        self.completed_at = Some(Utc::now());
    }

    /// Fail the task permanently
    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Schedule another attempt after a backoff delay
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, error: String) {
        self.status = TaskStatus::Retrying { retry_at };
        self.error = Some(error);
    }

    /// Re-queue a retrying task for its next attempt
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            "signal_parsing".to_string(),
            serde_json::json!({"text": "BUY XAUUSD"}),
            TaskPriority::High,
            3,
        )
    }

    #[test]
    fn lifecycle_timestamps() {
        let mut t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.attempts, 0);

        t.start_processing();
        assert!(t.status.is_processing());
        assert_eq!(t.attempts, 1);
        assert!(t.started_at.is_some());

        t.complete(Some(serde_json::json!({"symbol": "XAUUSD"})));
        assert!(t.status.is_terminal());
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn can_retry_respects_attempt_cap() {
        let mut t = task();
        t.attempts = 3;
        assert!(!t.can_retry());

        let mut t = task();
        t.attempts = 2;
        assert!(t.can_retry());
        t.fail("boom".to_string());
        assert!(!t.can_retry());
    }
}
