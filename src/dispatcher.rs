//! The dispatch loop.
//!
//! Each loop iteration promotes whatever has become due (task backoffs and
//! retry-engine entries), then pops the highest-priority ready task and
//! executes it through its registered worker. A task is removed from the
//! queue before execution and re-enqueued only after its outcome is known,
//! so at most one execution per task identity is in flight at any time.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::error::TaskError;
use crate::retry::engine::AttemptOutcome;
use crate::scheduler::SchedulerInner;
use crate::types::{Task, TaskEvent, TaskId, TaskStatus};
use crate::worker::TaskWorker;

pub(crate) struct Dispatcher {
    inner: Arc<SchedulerInner>,
}

impl Dispatcher {
    pub(crate) fn new(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    /// Run the dispatch loop until shutdown is requested.
    ///
    /// Shutdown is observed between iterations, never racing an in-flight
    /// tick: a claimed task always runs to its outcome, so no task is left
    /// stuck in processing when the loop exits. Only the idle sleep is
    /// interruptible.
    pub(crate) async fn run(self, worker_index: usize, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(worker_index, "dispatch loop started");
        loop {
            match shutdown_rx.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => {
                    info!(worker_index, "dispatch loop shutting down");
                    break;
                }
            }
            if !self.tick().await {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(worker_index, "dispatch loop shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.inner.config.idle_poll_interval) => {}
                }
            }
        }
    }

    /// One dispatch iteration: promote due work, then execute at most one
    /// task. Returns `true` if a task was executed.
    pub(crate) async fn tick(&self) -> bool {
        self.promote_due_tasks();
        self.promote_due_retries();

        let task_id = { self.inner.queue.lock().dequeue_next() };
        match task_id {
            Some(task_id) => {
                self.process_task(task_id).await;
                true
            }
            None => false,
        }
    }

    /// Move tasks whose backoff delay has elapsed back into the queue,
    /// preserving their original priority
    fn promote_due_tasks(&self) {
        let now = Utc::now();
        let due_ids = { self.inner.task_due.lock().drain_due(now) };
        if due_ids.is_empty() {
            return;
        }

        let mut tasks = self.inner.tasks.write();
        let mut queue = self.inner.queue.lock();
        for task_id in due_ids {
            let Some(task) = tasks.get_mut(&task_id) else {
                continue;
            };
            // Stale heap slot unless the task is still waiting on this delay
            match task.status {
                TaskStatus::Retrying { retry_at } if retry_at <= now => {
                    task.requeue();
                    queue.enqueue(task_id.clone(), task.priority);
                    debug!(task_id = %task_id, "requeued task after backoff");
                }
                _ => {}
            }
        }
    }

    /// Convert due retry entries into fresh task submissions sharing the
    /// same retry identity
    fn promote_due_retries(&self) {
        let due = self.inner.retries.due_entries();
        for entry in due {
            // Single attempt per resubmission: the retry engine owns the
            // attempt budget, not the task
            let task = Task::new(entry.task_type.clone(), entry.original_request.clone(), entry.priority, 1)
                .with_retry_id(entry.id.clone());
            let task_id = task.id.clone();
            let task_type = task.task_type.clone();

            {
                let mut tasks = self.inner.tasks.write();
                let mut queue = self.inner.queue.lock();
                let mut counters = self.inner.counters.lock();
                queue.enqueue(task_id.clone(), task.priority);
                tasks.insert(task_id.clone(), task);
                counters.total_submitted += 1;
            }

            debug!(task_id = %task_id, retry_id = %entry.id, attempt = entry.attempts + 1, "resubmitted retry attempt");
            self.inner.emit(TaskEvent::Submitted {
                task_id,
                task_type,
                at: Utc::now(),
            });
        }
    }

    async fn process_task(&self, task_id: TaskId) {
        // Claim the task: mark processing, bump the attempt counter
        let claimed = {
            let mut tasks = self.inner.tasks.write();
            let mut counters = self.inner.counters.lock();
            match tasks.get_mut(&task_id) {
                Some(task) if !task.status.is_terminal() => {
                    task.start_processing();
                    counters.active += 1;
                    Some((task.task_type.clone(), task.payload.clone(), task.attempts, task.retry_id.clone()))
                }
                _ => None,
            }
        };
        let Some((task_type, payload, attempt, retry_id)) = claimed else {
            return;
        };

        self.inner.emit(TaskEvent::Started {
            task_id: task_id.clone(),
            attempt,
            at: Utc::now(),
        });

        let worker = { self.inner.registry.read().get(&task_type) };
        let Some(worker) = worker else {
            // Permanent condition: no backoff regardless of attempt budget
            let error = format!("no worker registered for task type: {}", task_type);
            error!(task_id = %task_id, task_type = %task_type, "{}", error);
            self.fail_task(&task_id, error.clone());
            if let Some(retry_id) = retry_id {
                let _ = self
                    .inner
                    .retries
                    .mark_attempt(&retry_id, AttemptOutcome::Failure(error));
            }
            return;
        };

        let timeout = self.inner.config.timeout_for(&task_type);
        let outcome = execute_with_timeout(worker, payload, timeout).await;

        match outcome {
            Ok(result) => {
                self.complete_task(&task_id, result.clone());
                if let Some(retry_id) = retry_id {
                    let _ = self
                        .inner
                        .retries
                        .mark_attempt(&retry_id, AttemptOutcome::Success(Some(result)));
                }
            }
            Err(task_error) => {
                self.handle_failure(&task_id, &task_type, task_error, retry_id);
            }
        }
    }

    fn complete_task(&self, task_id: &TaskId, result: Value) {
        {
            let mut tasks = self.inner.tasks.write();
            let mut counters = self.inner.counters.lock();
            if let Some(task) = tasks.get_mut(task_id) {
                task.complete(Some(result));
                counters.active -= 1;
                counters.completed += 1;
            }
        }
        debug!(task_id = %task_id, "task completed");
        self.inner.emit(TaskEvent::Completed {
            task_id: task_id.clone(),
            at: Utc::now(),
        });
    }

    fn fail_task(&self, task_id: &TaskId, error: String) {
        {
            let mut tasks = self.inner.tasks.write();
            let mut counters = self.inner.counters.lock();
            if let Some(task) = tasks.get_mut(task_id) {
                task.fail(error.clone());
                counters.active -= 1;
                counters.failed += 1;
            }
        }
        self.inner.emit(TaskEvent::Failed {
            task_id: task_id.clone(),
            error,
            at: Utc::now(),
        });
    }

    fn handle_failure(
        &self,
        task_id: &TaskId,
        task_type: &str,
        task_error: TaskError,
        retry_id: Option<crate::types::RetryId>,
    ) {
        let reason = classify(&task_error);
        let message = task_error.message().to_string();

        // Retry-engine attempts are single-shot tasks; the engine decides
        // whether to re-arm
        if let Some(retry_id) = retry_id {
            warn!(task_id = %task_id, retry_id = %retry_id, error = %message, "retry attempt failed");
            self.fail_task(task_id, message.clone());
            let _ = self
                .inner
                .retries
                .mark_attempt(&retry_id, AttemptOutcome::Failure(message));
            return;
        }

        let retry_at = {
            let mut tasks = self.inner.tasks.write();
            let mut counters = self.inner.counters.lock();
            match (tasks.get_mut(task_id), reason) {
                (Some(task), Some(reason)) if task.can_retry() => {
                    let delay = self.inner.config.policies.policy_for(reason).delay_for(task.attempts);
                    let retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    task.schedule_retry(retry_at, message.clone());
                    counters.active -= 1;
                    self.inner.task_due.lock().push(task_id.clone(), retry_at);
                    Some((reason, retry_at))
                }
                (Some(_), _) => None,
                (None, _) => return,
            }
        };

        match retry_at {
            Some((reason, retry_at)) => {
                warn!(
                    task_id = %task_id,
                    task_type = %task_type,
                    reason = %reason,
                    retry_at = %retry_at,
                    error = %message,
                    "task failed, backoff retry scheduled"
                );
                self.inner.emit(TaskEvent::RetryScheduled {
                    task_id: task_id.clone(),
                    reason,
                    retry_at,
                    at: Utc::now(),
                });
            }
            None => {
                error!(task_id = %task_id, task_type = %task_type, error = %message, "task failed permanently");
                self.fail_task(task_id, message);
            }
        }
    }
}

/// Execute a worker invocation bounded by a timeout, with panics caught at
/// the dispatch boundary.
///
/// The handler runs on its own spawned task so a panic unwinds there
/// instead of tearing down the dispatch loop; both panics and timeouts are
/// converted into retryable failures that classify as unknown.
async fn execute_with_timeout(
    worker: Arc<dyn TaskWorker>,
    payload: Value,
    timeout: std::time::Duration,
) -> Result<Value, TaskError> {
    let mut handle = tokio::spawn(async move { worker.execute(payload).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                Err(TaskError::retryable(format!("worker panicked: {}", join_error)))
            } else {
                Err(TaskError::retryable("worker task was canceled"))
            }
        }
        Err(_) => {
            handle.abort();
            Err(TaskError::retryable(format!(
                "worker timed out after {:?}",
                timeout
            )))
        }
    }
}
