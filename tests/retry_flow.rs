//! End-to-end flow: failed trade executions recorded with the retry engine
//! are resubmitted through the dispatcher and settle into terminal state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use signal_dispatch::prelude::*;
use signal_dispatch::{RetryPolicy, RetryReason};

struct RecoveringExecutor {
    calls: AtomicUsize,
    failures_before_success: usize,
}

#[async_trait]
impl TaskWorker for RecoveringExecutor {
    async fn execute(&self, payload: Value) -> Result<Value, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(TaskError::retryable("no connection to trade server"))
        } else {
            Ok(json!({"ticket": 12345, "request": payload}))
        }
    }
}

struct AlwaysDownExecutor;

#[async_trait]
impl TaskWorker for AlwaysDownExecutor {
    async fn execute(&self, _payload: Value) -> Result<Value, TaskError> {
        Err(TaskError::retryable("no connection to trade server"))
    }
}

fn trade_request() -> Value {
    json!({"symbol": "XAUUSD", "side": "buy", "volume": 0.1})
}

#[tokio::test]
async fn failed_execution_is_resubmitted_and_succeeds() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_worker(
        "trade_execution",
        Arc::new(RecoveringExecutor {
            calls: AtomicUsize::new(0),
            failures_before_success: 0,
        }),
    );

    // The first live attempt failed outside the scheduler; the caller
    // reports it for backoff retry
    let retry_id = scheduler.add_failed_execution(
        "order-5",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );

    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.status, RetryStatus::Pending);
    assert_eq!(entry.attempts, 1);
    assert!(entry.next_retry_at.is_some());

    // Backoff has not elapsed yet: the dispatcher finds nothing
    assert!(!scheduler.run_dispatch_once().await);

    // Once due, the entry is converted into a fresh task submission and
    // executed
    assert!(scheduler.force_retry_due(&retry_id));
    assert!(scheduler.run_dispatch_once().await);

    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.status, RetryStatus::Success);
    assert!(entry.final_result.is_some());
    assert_eq!(entry.error_history.len(), 1);

    // Caller evicts the entry after persisting the outcome
    assert!(scheduler.mark_synced(&retry_id));
    assert!(scheduler.get_retry_status(&retry_id).is_none());
}

#[tokio::test]
async fn backoff_schedule_doubles_per_recorded_failure() {
    let scheduler = Scheduler::new(SchedulerConfig::default().with_retry_policy(
        RetryReason::Mt5Disconnected,
        RetryPolicy::exponential(Duration::from_secs(5), 3, Duration::from_secs(300)),
    ));

    let retry_id = scheduler.add_failed_execution(
        "order-5",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );

    // First failure: retry in ~5s
    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    let delay = (entry.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((3..=5).contains(&delay), "expected ~5s delay, got {}s", delay);

    // Second failure: retry in ~10s
    scheduler.add_failed_execution(
        "order-5",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );
    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.attempts, 2);
    let delay = (entry.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((8..=10).contains(&delay), "expected ~10s delay, got {}s", delay);

    // Third failure hits the cap: terminal, no further schedule
    scheduler.add_failed_execution(
        "order-5",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );
    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.status, RetryStatus::Failed);
    assert_eq!(entry.attempts, 3);
    assert!(entry.next_retry_at.is_none());
    assert_eq!(entry.error_history.len(), 3);
}

#[tokio::test]
async fn exhausted_entry_keeps_full_error_history() {
    // Two attempts total, short leash
    let scheduler = Scheduler::new(SchedulerConfig::default().with_retry_policy(
        RetryReason::Mt5Disconnected,
        RetryPolicy::exponential(Duration::from_secs(5), 2, Duration::from_secs(60)),
    ));
    scheduler.register_worker("trade_execution", Arc::new(AlwaysDownExecutor));

    let retry_id = scheduler.add_failed_execution(
        "order-6",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );

    // The resubmitted attempt fails too, exhausting the budget
    assert!(scheduler.force_retry_due(&retry_id));
    assert!(scheduler.run_dispatch_once().await);

    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.status, RetryStatus::Failed);
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.error_history.len(), 2);
    assert!(entry.next_retry_at.is_none());

    // No further resubmission happens
    assert!(!scheduler.run_dispatch_once().await);
}

#[tokio::test]
async fn canceled_retry_is_never_resubmitted() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_worker("trade_execution", Arc::new(AlwaysDownExecutor));

    let retry_id = scheduler.add_failed_execution(
        "order-7",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::MarketClosed,
        "market is closed",
    );
    scheduler.force_retry_due(&retry_id);

    assert!(scheduler.cancel_retry(&retry_id));
    assert!(!scheduler.cancel_retry(&retry_id));

    assert!(!scheduler.run_dispatch_once().await);
    let entry = scheduler.get_retry_status(&retry_id).unwrap();
    assert_eq!(entry.status, RetryStatus::Abandoned);
    assert_eq!(entry.attempts, 1);
}

#[tokio::test]
async fn resubmitted_attempt_preserves_priority() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.register_worker(
        "trade_execution",
        Arc::new(RecoveringExecutor {
            calls: AtomicUsize::new(0),
            failures_before_success: 0,
        }),
    );
    // A competing normal-priority task sits in the queue first
    let normal = scheduler.submit(
        "trade_execution",
        json!({"symbol": "EURUSD"}),
        TaskPriority::Normal,
        None,
    );

    let retry_id = scheduler.add_failed_execution(
        "order-8",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::WideSpread,
        "spread too wide",
    );
    scheduler.force_retry_due(&retry_id);

    // The critical resubmission preempts the earlier normal task
    assert!(scheduler.run_dispatch_once().await);
    assert_eq!(
        scheduler.get_retry_status(&retry_id).unwrap().status,
        RetryStatus::Success
    );
    assert_eq!(
        scheduler.get_task_status(&normal).unwrap().status,
        TaskStatus::Pending
    );
}

#[tokio::test]
async fn stats_reflect_retry_engine_state() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    scheduler.add_failed_execution(
        "order-a",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::Mt5Disconnected,
        "no connection to trade server",
    );
    let canceled = scheduler.add_failed_execution(
        "order-b",
        "trade_execution",
        trade_request(),
        TaskPriority::Critical,
        RetryReason::MarketClosed,
        "market is closed",
    );
    scheduler.cancel_retry(&canceled);

    let stats = scheduler.queue_stats();
    assert_eq!(stats.retries.pending, 1);
    assert_eq!(stats.retries.abandoned, 1);
    assert_eq!(stats.total_submitted, 0);
}
