use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::scheduler::SchedulerInner;
use crate::types::{TaskEvent, TaskId};

/// Periodic sweep evicting terminal tasks and retry entries once they age
/// past the retention window
pub(crate) struct Reaper {
    inner: Arc<SchedulerInner>,
}

impl Reaper {
    pub(crate) fn new(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    /// Run the sweep loop until shutdown is requested
    pub(crate) async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.inner.config.reaper_interval);
        info!(interval = ?self.inner.config.reaper_interval, "reaper started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = self.sweep_once();
                    if evicted > 0 {
                        info!(evicted, "reaped terminal records past retention");
                    } else {
                        debug!("nothing to reap");
                    }
                }
            }
        }
    }

    /// Run one sweep, returning the number of evicted records
    pub(crate) fn sweep_once(&self) -> usize {
        let retention = self.inner.config.retention;
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();

        let evicted_tasks = {
            let mut tasks = self.inner.tasks.write();
            let expired: Vec<TaskId> = tasks
                .iter()
                .filter(|(_, task)| {
                    task.status.is_terminal()
                        && task.completed_at.unwrap_or(task.created_at) < cutoff
                })
                .map(|(id, _)| id.clone())
                .collect();
            for task_id in &expired {
                tasks.remove(task_id);
            }
            expired.len()
        };

        let evicted_retries = self.inner.retries.sweep_terminal(retention);

        let evicted = evicted_tasks + evicted_retries;
        if evicted > 0 {
            self.inner.emit(TaskEvent::Reaped {
                evicted,
                at: Utc::now(),
            });
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::config::SchedulerConfig;
    use crate::error::TaskError;
    use crate::scheduler::Scheduler;
    use crate::types::{TaskPriority, TaskStatus};
    use crate::worker::TaskWorker;

    struct OkWorker;

    #[async_trait]
    impl TaskWorker for OkWorker {
        async fn execute(&self, payload: Value) -> Result<Value, TaskError> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn sweep_evicts_terminal_tasks_past_retention() {
        // Zero retention: terminal records are eligible immediately
        let scheduler = Scheduler::new(
            SchedulerConfig::default().with_retention(Duration::from_secs(0)),
        );
        scheduler.register_worker("signal_parsing", Arc::new(OkWorker));

        let task_id = scheduler.submit(
            "signal_parsing",
            serde_json::json!({}),
            TaskPriority::Normal,
            None,
        );
        scheduler.run_dispatch_once().await;
        assert_eq!(
            scheduler.get_task_status(&task_id).unwrap().status,
            TaskStatus::Completed
        );

        let evicted = scheduler.sweep_once();
        assert_eq!(evicted, 1);
        assert!(scheduler.get_task_status(&task_id).is_none());
    }

    #[tokio::test]
    async fn sweep_keeps_live_tasks() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default().with_retention(Duration::from_secs(0)),
        );

        // Pending task, never dispatched
        let task_id = scheduler.submit(
            "signal_parsing",
            serde_json::json!({}),
            TaskPriority::Normal,
            None,
        );

        assert_eq!(scheduler.sweep_once(), 0);
        assert!(scheduler.get_task_status(&task_id).is_some());
    }

    #[tokio::test]
    async fn sweep_respects_retention_window() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default().with_retention(Duration::from_secs(24 * 60 * 60)),
        );
        scheduler.register_worker("signal_parsing", Arc::new(OkWorker));

        scheduler.submit("signal_parsing", serde_json::json!({}), TaskPriority::Normal, None);
        scheduler.run_dispatch_once().await;

        // Completed just now, well inside the 24h window
        assert_eq!(scheduler.sweep_once(), 0);
    }
}
