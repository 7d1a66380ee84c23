//! # signal-dispatch: Task Dispatch & Failure-Aware Retry for Trading Automation
//!
//! **Priority scheduling, typed workers, and reason-specific backoff retry**
//!
//! signal-dispatch schedules trading-automation jobs (signal parsing, trade
//! execution, cleanup) across a pool of type-specific workers without ever
//! losing a job or double-executing one:
//!
//! - **Strict priority precedence**: four ordered buckets
//!   (critical/high/normal/low), FIFO within a bucket
//! - **Typed worker registry**: compile-time-checked handler signatures,
//!   runtime dispatch only at the task-type boundary
//! - **Failure classification**: execution errors map onto a
//!   [`RetryReason`](classifier::RetryReason) that selects the backoff curve
//!   (MT5 disconnect, market closed, insufficient margin, slippage, spread)
//! - **Non-blocking backoff**: scheduled retries wait in a time-ordered
//!   due-queue drained by the dispatcher's idle tick, never inside a sleep
//! - **Bounded attempt budgets**: every retry entry keeps its full error
//!   history and fails terminally once its cap is hit
//! - **Structured observability**: broadcast event stream plus per-bucket
//!   queue statistics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use signal_dispatch::prelude::*;
//!
//! struct TradeExecutor;
//!
//! #[async_trait]
//! impl TaskWorker for TradeExecutor {
//!     async fn execute(&self, _payload: Value) -> Result<Value, TaskError> {
//!         // Talk to the trading terminal here
//!         Err(TaskError::retryable("no connection to trade server"))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.register_worker("trade_execution", Arc::new(TradeExecutor));
//! let handle = scheduler.start();
//!
//! let task_id = scheduler.submit(
//!     "trade_execution",
//!     json!({"symbol": "XAUUSD", "side": "buy", "volume": 0.1}),
//!     TaskPriority::Critical,
//!     None,
//! );
//!
//! // ... later
//! let snapshot = scheduler.get_task_status(&task_id);
//! handle.shutdown().await.unwrap();
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod due;
pub mod error;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod types;
pub mod worker;

mod dispatcher;

// Core API exports
pub use classifier::{classify, classify_message, RetryReason};
pub use config::SchedulerConfig;
pub use error::{DispatchError, DispatchResult, TaskError};
pub use queue::{PriorityQueue, QueueDepths};
pub use retry::{
    AttemptOutcome, BackoffKind, RetryEngine, RetryEntry, RetryPolicy, RetryPolicySet,
    RetryStats, RetryStatus,
};
pub use scheduler::{QueueStats, Scheduler, SchedulerHandle};
pub use types::{RetryId, Task, TaskEvent, TaskId, TaskPriority, TaskStatus};
pub use worker::{TaskWorker, WorkerRegistry};

/// Prelude for task scheduling and retry handling
pub mod prelude {
    pub use crate::{
        RetryReason, Scheduler, SchedulerConfig, SchedulerHandle, TaskError, TaskId,
        TaskPriority, TaskStatus, TaskWorker,
    };

    pub use crate::{RetryEntry, RetryId, RetryPolicy, RetryStatus};

    pub use crate::{DispatchError, DispatchResult};

    // Essential traits
    pub use async_trait::async_trait;
}
