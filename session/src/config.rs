//! Session manager configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;
use tally_engine::ReconcilePolicy;

/// Tuning for the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Backoff for every remote round-trip
    pub retry: RetryPolicy,
    /// Upper bound on the whole poll loop
    pub poll_budget: Duration,
    /// Buffered snapshots per progress subscriber before it lags
    pub progress_capacity: usize,
    /// Matching, diffing and merge rules for locally computed reconciliation
    pub policy: ReconcilePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            poll_budget: Duration::from_secs(600),
            progress_capacity: 64,
            policy: ReconcilePolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_budget(mut self, poll_budget: Duration) -> Self {
        self.poll_budget = poll_budget;
        self
    }

    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity.max(1);
        self
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }
}
