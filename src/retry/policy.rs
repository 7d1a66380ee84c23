use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::RetryReason;

/// Shape of the backoff curve between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffKind {
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`
    Exponential,

    /// `base_delay * attempt`, capped at `max_delay` - for reasons where
    /// rapid retry is safe
    Linear,
}

/// Per-reason retry policy: how often and how long to keep trying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Maximum recorded failures before the entry fails terminally
    pub max_attempts: u32,

    /// Backoff curve shape
    pub backoff: BackoffKind,

    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create an exponential policy
    pub fn exponential(base_delay: Duration, max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_attempts,
            backoff: BackoffKind::Exponential,
            max_delay,
        }
    }

    /// Create a linear policy
    pub fn linear(base_delay: Duration, max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_attempts,
            backoff: BackoffKind::Linear,
            max_delay,
        }
    }

    /// Delay before the given attempt (1-based: the first recorded failure
    /// computes `delay_for(1)`)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs();
        let secs = match self.backoff {
            // Saturate the shift so large attempt counts cannot overflow
            BackoffKind::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
            BackoffKind::Linear => base.saturating_mul(attempt as u64),
        };
        Duration::from_secs(secs.min(self.max_delay.as_secs()))
    }
}

/// Policy table mapping each retry reason to its backoff behavior
#[derive(Debug, Clone)]
pub struct RetryPolicySet {
    policies: HashMap<RetryReason, RetryPolicy>,
}

impl RetryPolicySet {
    /// Get the policy for a reason, falling back to the conservative
    /// unknown-failure policy
    pub fn policy_for(&self, reason: RetryReason) -> &RetryPolicy {
        self.policies
            .get(&reason)
            .unwrap_or_else(|| &self.policies[&RetryReason::Unknown])
    }

    /// Override the policy for one reason
    pub fn set_policy(&mut self, reason: RetryReason, policy: RetryPolicy) {
        self.policies.insert(reason, policy);
    }
}

impl Default for RetryPolicySet {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            RetryReason::Mt5Disconnected,
            RetryPolicy::exponential(Duration::from_secs(5), 5, Duration::from_secs(300)),
        );
        policies.insert(
            RetryReason::MarketClosed,
            RetryPolicy::exponential(Duration::from_secs(300), 10, Duration::from_secs(3600)),
        );
        policies.insert(
            RetryReason::InsufficientMargin,
            RetryPolicy::exponential(Duration::from_secs(60), 3, Duration::from_secs(600)),
        );
        policies.insert(
            RetryReason::HighSlippage,
            RetryPolicy::linear(Duration::from_secs(2), 4, Duration::from_secs(30)),
        );
        policies.insert(
            RetryReason::WideSpread,
            RetryPolicy::exponential(Duration::from_secs(10), 5, Duration::from_secs(120)),
        );
        // Conservative default for unclassified failures
        policies.insert(
            RetryReason::Unknown,
            RetryPolicy::exponential(Duration::from_secs(30), 2, Duration::from_secs(300)),
        );
        Self { policies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_doubles_until_cap() {
        let policy = RetryPolicy::exponential(Duration::from_secs(5), 5, Duration::from_secs(300));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(7), Duration::from_secs(300));
        assert_eq!(policy.delay_for(100), Duration::from_secs(300));
    }

    #[test]
    fn linear_grows_by_base() {
        let policy = RetryPolicy::linear(Duration::from_secs(2), 4, Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let policy = RetryPolicy::exponential(Duration::from_secs(5), 3, Duration::from_secs(60));
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
    }

    #[test]
    fn every_reason_has_a_default_policy() {
        let set = RetryPolicySet::default();
        for reason in RetryReason::all() {
            let policy = set.policy_for(*reason);
            assert!(policy.max_attempts > 0);
            assert!(policy.base_delay <= policy.max_delay);
        }
    }

    #[test]
    fn policy_override_replaces_default() {
        let mut set = RetryPolicySet::default();
        let custom = RetryPolicy::linear(Duration::from_secs(1), 2, Duration::from_secs(5));
        set.set_policy(RetryReason::MarketClosed, custom.clone());
        assert_eq!(set.policy_for(RetryReason::MarketClosed), &custom);
    }

    proptest! {
        #[test]
        fn backoff_is_monotone_and_capped(
            base in 1u64..120,
            cap in 1u64..7200,
            attempt in 1u32..64,
        ) {
            let policy = RetryPolicy::exponential(
                Duration::from_secs(base),
                10,
                Duration::from_secs(cap),
            );
            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(current <= Duration::from_secs(cap));
        }
    }
}
