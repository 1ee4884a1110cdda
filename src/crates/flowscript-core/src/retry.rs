//! Per-node failure policies: bounded retry and error-edge conversion
//!
//! The interpreter's default policy is to fail the execution when a node's
//! `execute` errors. A [`NodePolicy`] interposed per node name can soften
//! that: retry the call a bounded number of times with a delay, or convert
//! the final failure into an `error` edge a surrounding branch can select.

use rand::Rng;
use std::time::Duration;

/// Bounded retry with optional exponential backoff and jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts (1 = no retry)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Multiplier applied to the delay per attempt
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_interval: Duration,
    /// Randomize each delay by 0.5x..1.5x to avoid thundering herds
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bound and defaults otherwise
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts` completed calls
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Failure handling for one node name
#[derive(Debug, Clone, Default)]
pub struct NodePolicy {
    /// Retry failed `execute` calls before giving up
    pub retry: Option<RetryPolicy>,
    /// Convert the final failure into an `error` edge instead of propagating
    pub error_edge: bool,
}

impl NodePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_error_edge(mut self) -> Self {
        self.error_edge = true;
        self
    }
}
