use std::collections::HashMap;
use std::time::Duration;

use crate::classifier::RetryReason;
use crate::retry::policy::{RetryPolicy, RetryPolicySet};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of concurrent dispatch loops sharing the queue
    pub max_workers: usize,

    /// How long a dispatch loop suspends when nothing is ready
    pub idle_poll_interval: Duration,

    /// Default timeout for a single worker invocation
    pub worker_timeout: Duration,

    /// Per-task-type timeout overrides
    pub worker_timeouts: HashMap<String, Duration>,

    /// Default attempt cap for submitted tasks
    pub default_max_attempts: u32,

    /// How long terminal tasks and retry entries are kept in memory
    pub retention: Duration,

    /// How often the reaper sweeps terminal state
    pub reaper_interval: Duration,

    /// Per-reason retry policy table
    pub policies: RetryPolicySet,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            idle_poll_interval: Duration::from_millis(100),
            worker_timeout: Duration::from_secs(30),
            worker_timeouts: HashMap::new(),
            default_max_attempts: 3,
            retention: Duration::from_secs(24 * 60 * 60),
            reaper_interval: Duration::from_secs(60),
            policies: RetryPolicySet::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the number of dispatch loops
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the idle poll interval
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Set the default worker invocation timeout
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Override the invocation timeout for one task type
    pub fn with_worker_timeout_for(mut self, task_type: impl Into<String>, timeout: Duration) -> Self {
        self.worker_timeouts.insert(task_type.into(), timeout);
        self
    }

    /// Set the default attempt cap for submitted tasks
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Set the retention window for terminal state
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the reaper sweep interval
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Override the retry policy for one reason
    pub fn with_retry_policy(mut self, reason: RetryReason, policy: RetryPolicy) -> Self {
        self.policies.set_policy(reason, policy);
        self
    }

    /// Timeout for a worker invocation of the given task type
    pub fn timeout_for(&self, task_type: &str) -> Duration {
        self.worker_timeouts
            .get(task_type)
            .copied()
            .unwrap_or(self.worker_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_type_timeout_falls_back_to_default() {
        let config = SchedulerConfig::default()
            .with_worker_timeout(Duration::from_secs(10))
            .with_worker_timeout_for("trade_execution", Duration::from_secs(5));

        assert_eq!(config.timeout_for("trade_execution"), Duration::from_secs(5));
        assert_eq!(config.timeout_for("signal_parsing"), Duration::from_secs(10));
    }

    #[test]
    fn policy_override_via_builder() {
        let policy = RetryPolicy::linear(Duration::from_secs(1), 2, Duration::from_secs(4));
        let config = SchedulerConfig::default()
            .with_retry_policy(RetryReason::WideSpread, policy.clone());
        assert_eq!(config.policies.policy_for(RetryReason::WideSpread), &policy);
    }
}
