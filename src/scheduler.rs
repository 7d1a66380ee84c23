use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, instrument};

use crate::classifier::RetryReason;
use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::due::DueQueue;
use crate::error::{DispatchError, DispatchResult};
use crate::queue::{PriorityQueue, QueueDepths};
use crate::retry::engine::{RetryEngine, RetryStats};
use crate::retry::entry::RetryEntry;
use crate::retry::reaper::Reaper;
use crate::types::{RetryId, Task, TaskEvent, TaskId, TaskPriority, TaskStatus};
use crate::worker::{TaskWorker, WorkerRegistry};

/// Statistics counters, mutated only inside the critical section that
/// changes the corresponding task status
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub total_submitted: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queued task count per priority bucket
    pub queued: QueueDepths,

    /// Tasks currently being executed
    pub active_tasks: usize,

    /// Tasks completed successfully
    pub completed_tasks: usize,

    /// Tasks failed terminally
    pub failed_tasks: usize,

    /// Tasks waiting out a backoff delay
    pub retrying_tasks: usize,

    /// Total tasks ever submitted
    pub total_submitted: usize,

    /// Retry engine state counts
    pub retries: RetryStats,
}

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) tasks: RwLock<HashMap<TaskId, Task>>,
    pub(crate) queue: Mutex<PriorityQueue>,
    pub(crate) task_due: Mutex<DueQueue<TaskId>>,
    pub(crate) registry: RwLock<WorkerRegistry>,
    pub(crate) retries: RetryEngine,
    pub(crate) counters: Mutex<Counters>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
}

impl SchedulerInner {
    pub(crate) fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}

/// Handle for the running worker pool and reaper
pub struct SchedulerHandle {
    shutdown_txs: Vec<oneshot::Sender<()>>,
    join_handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Gracefully stop every background loop and wait for them to finish
    pub async fn shutdown(self) -> DispatchResult<()> {
        for tx in self.shutdown_txs {
            let _ = tx.send(());
        }
        for handle in self.join_handles {
            handle
                .await
                .map_err(|e| DispatchError::Internal(format!("worker join error: {}", e)))?;
        }
        Ok(())
    }
}

/// Task scheduler: priority queue, worker registry, and retry engine behind
/// one explicit instance.
///
/// Cheap to clone; clones share state, so tests can hold one clone while a
/// worker pool runs on another.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        let retries = RetryEngine::with_events(config.policies.clone(), events.clone());
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                tasks: RwLock::new(HashMap::new()),
                queue: Mutex::new(PriorityQueue::new()),
                task_due: Mutex::new(DueQueue::new()),
                registry: RwLock::new(WorkerRegistry::new()),
                retries,
                counters: Mutex::new(Counters::default()),
                events,
            }),
        }
    }

    /// Register a worker for a task type. Last registration wins.
    pub fn register_worker(&self, task_type: impl Into<String>, worker: Arc<dyn TaskWorker>) {
        let task_type = task_type.into();
        info!(task_type = %task_type, "registered worker");
        self.inner.registry.write().register(task_type, worker);
    }

    /// Submit a task for execution. Enqueues and returns immediately.
    #[instrument(skip(self, payload))]
    pub fn submit(
        &self,
        task_type: &str,
        payload: Value,
        priority: TaskPriority,
        max_attempts: Option<u32>,
    ) -> TaskId {
        let task = Task::new(
            task_type.to_string(),
            payload,
            priority,
            max_attempts.unwrap_or(self.inner.config.default_max_attempts),
        );
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

        self.inner.emit(TaskEvent::Submitted {
            task_id: task_id.clone(),
            task_type,
            at: Utc::now(),
        });
        task_id
    }

    /// Get a read-only snapshot of a task
    pub fn get_task_status(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.tasks.read().get(task_id).cloned()
    }

    /// Record a failed trade execution for reason-specific backoff retry.
    ///
    /// Idempotent per `request_id`. The retry engine resubmits the request
    /// as a fresh task (same identity, incremented attempt count) when its
    /// backoff delay elapses.
    pub fn add_failed_execution(
        &self,
        request_id: impl Into<String>,
        task_type: impl Into<String>,
        request: Value,
        priority: TaskPriority,
        reason: RetryReason,
        error: impl Into<String>,
    ) -> RetryId {
        self.inner
            .retries
            .add_failed_execution(request_id, task_type, request, priority, reason, error)
    }

    /// Get a read-only snapshot of a retry entry
    pub fn get_retry_status(&self, retry_id: &RetryId) -> Option<RetryEntry> {
        self.inner.retries.get(retry_id)
    }

    /// Get the live retry entry for a request identity
    pub fn get_retry_by_request(&self, request_id: &str) -> Option<RetryEntry> {
        self.inner.retries.get_by_request(request_id)
    }

    /// Cancel a retry entry. Returns `false` if it is already terminal or
    /// unknown; calling twice is safe.
    pub fn cancel_retry(&self, retry_id: &RetryId) -> bool {
        self.inner.retries.cancel(retry_id)
    }

    /// Evict a terminal retry entry once its outcome has been persisted
    pub fn mark_synced(&self, retry_id: &RetryId) -> bool {
        self.inner.retries.mark_synced(retry_id)
    }

    /// Current queue depths and lifecycle counters
    pub fn queue_stats(&self) -> QueueStats {
        let tasks = self.inner.tasks.read();
        let queue = self.inner.queue.lock();
        let counters = self.inner.counters.lock();

        let retrying_tasks = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Retrying { .. }))
            .count();

        QueueStats {
            queued: queue.depths(),
            active_tasks: counters.active,
            completed_tasks: counters.completed,
            failed_tasks: counters.failed,
            retrying_tasks,
            total_submitted: counters.total_submitted,
            retries: self.inner.retries.stats(),
        }
    }

    /// Subscribe to the scheduler's event stream
    pub fn event_stream(&self) -> impl Stream<Item = TaskEvent> {
        BroadcastStream::new(self.inner.events.subscribe()).filter_map(|result| result.ok())
    }

    /// Start the worker pool and reaper. Background loops run until the
    /// returned handle is shut down.
    pub fn start(&self) -> SchedulerHandle {
        let mut shutdown_txs = Vec::new();
        let mut join_handles = Vec::new();

        for worker_index in 0..self.inner.config.max_workers {
            let (tx, rx) = oneshot::channel();
            let dispatcher = Dispatcher::new(self.inner.clone());
            shutdown_txs.push(tx);
            join_handles.push(tokio::spawn(async move {
                dispatcher.run(worker_index, rx).await;
            }));
        }

        let (tx, rx) = oneshot::channel();
        let reaper = Reaper::new(self.inner.clone());
        shutdown_txs.push(tx);
        join_handles.push(tokio::spawn(async move {
            reaper.run(rx).await;
        }));

        info!(workers = self.inner.config.max_workers, "scheduler started");
        SchedulerHandle {
            shutdown_txs,
            join_handles,
        }
    }

    /// Run one dispatch tick inline: promote due retries, then execute at
    /// most one queued task. Returns `true` if a task was executed.
    ///
    /// Useful for deterministic tests and embedding into an external loop.
    pub async fn run_dispatch_once(&self) -> bool {
        Dispatcher::new(self.inner.clone()).tick().await
    }

    /// Run one reaper sweep inline, returning the number of evicted records
    pub fn sweep_once(&self) -> usize {
        Reaper::new(self.inner.clone()).sweep_once()
    }
}

/// Test helpers for deterministic scheduling without real delays
impl Scheduler {
    /// Pull a retry entry's scheduled time into the past (test helper)
    pub fn force_retry_due(&self, retry_id: &RetryId) -> bool {
        self.inner.retries.force_due(retry_id)
    }

    /// Pull a retrying task's scheduled time into the past (test helper)
    pub fn force_task_due(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.inner.tasks.write();
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if !matches!(task.status, TaskStatus::Retrying { .. }) {
            return false;
        }
        let past = Utc::now() - chrono::Duration::seconds(1);
        task.status = TaskStatus::Retrying { retry_at: past };
        self.inner.task_due.lock().push(task_id.clone(), past);
        true
    }
}
