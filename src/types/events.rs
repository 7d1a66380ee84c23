use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RetryId, TaskId};
use crate::classifier::RetryReason;

/// Minimal stable event protocol for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    /// Task was submitted to the queue
    Submitted {
        task_id: TaskId,
        task_type: String,
        at: DateTime<Utc>,
    },

    /// Task was picked up by a dispatcher
    Started {
        task_id: TaskId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Task completed successfully
    Completed {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    /// Task failed permanently
    Failed {
        task_id: TaskId,
        error: String,
        at: DateTime<Utc>,
    },

    /// A retry was scheduled for a task or trade execution
    RetryScheduled {
        task_id: TaskId,
        reason: RetryReason,
        retry_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// A retry entry hit its attempt cap
    RetryExhausted {
        retry_id: RetryId,
        at: DateTime<Utc>,
    },

    /// A retry entry was canceled by the caller
    RetryAbandoned {
        retry_id: RetryId,
        at: DateTime<Utc>,
    },

    /// The reaper evicted terminal state past the retention window
    Reaped {
        evicted: usize,
        at: DateTime<Utc>,
    },
}

impl TaskEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::RetryAbandoned { .. } => "retry_abandoned",
            Self::Reaped { .. } => "reaped",
        }
    }

    /// Get the task ID if this event concerns a task
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Submitted { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::RetryScheduled { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Submitted { at, .. } => at,
            Self::Started { at, .. } => at,
            Self::Completed { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::RetryScheduled { at, .. } => at,
            Self::RetryExhausted { at, .. } => at,
            Self::RetryAbandoned { at, .. } => at,
            Self::Reaped { at, .. } => at,
        }
    }
}
