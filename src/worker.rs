use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::TaskError;

/// A registered handler capable of executing one task type.
///
/// This is the seam where signal-parsing or trade-execution logic plugs in;
/// the dispatcher never inspects handler internals, only the
/// `(result, error)` outcome.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    /// Execute the task payload
    async fn execute(&self, payload: Value) -> Result<Value, TaskError>;
}

/// Registry mapping a task-type key to its worker
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn TaskWorker>>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker for a task type. Re-registering a key replaces the
    /// previous worker.
    pub fn register(&mut self, task_type: impl Into<String>, worker: Arc<dyn TaskWorker>) {
        let task_type = task_type.into();
        if self.workers.insert(task_type.clone(), worker).is_some() {
            debug!(task_type = %task_type, "replaced existing worker registration");
        }
    }

    /// Look up the worker for a task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskWorker>> {
        self.workers.get(task_type).cloned()
    }

    /// Check if a task type has a registered worker
    pub fn is_registered(&self, task_type: &str) -> bool {
        self.workers.contains_key(task_type)
    }

    /// All registered task types
    pub fn registered_types(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoWorker;

    #[async_trait]
    impl TaskWorker for EchoWorker {
        async fn execute(&self, payload: Value) -> Result<Value, TaskError> {
            Ok(payload)
        }
    }

    struct RejectWorker;

    #[async_trait]
    impl TaskWorker for RejectWorker {
        async fn execute(&self, _payload: Value) -> Result<Value, TaskError> {
            Err(TaskError::permanent("always rejects"))
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = WorkerRegistry::new();
        registry.register("signal_parsing", Arc::new(EchoWorker));

        assert!(registry.is_registered("signal_parsing"));
        assert!(!registry.is_registered("trade_execution"));

        let worker = registry.get("signal_parsing").unwrap();
        let payload = serde_json::json!({"text": "SELL EURUSD"});
        let result = worker.execute(payload.clone()).await.unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut registry = WorkerRegistry::new();
        registry.register("trade_execution", Arc::new(EchoWorker));
        registry.register("trade_execution", Arc::new(RejectWorker));

        let worker = registry.get("trade_execution").unwrap();
        let result = worker.execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(TaskError::Permanent(_))));
    }
}
