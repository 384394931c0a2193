use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy combining exponential backoff parameters with an attempt
/// limit.
///
/// `max_attempts` counts total attempts including the first one; `None`
/// means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_interval_ms: 1_000,
            max_interval_ms: 30_000,
            randomization_factor: 0.2,
            multiplier: 2.0,
            max_elapsed_time_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Schedule for individual vendor-API calls: 3 attempts, delays
    /// `min(1s * 2^(n-1), 10s)`, no jitter.
    pub fn vendor_api_call() -> Self {
        Self {
            max_attempts: Some(3),
            initial_interval_ms: 1_000,
            max_interval_ms: 10_000,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time_ms: None,
        }
    }

    /// Schedule for the composite device fetch: 2 attempts on the same
    /// delay curve.
    pub fn vendor_api_fetch() -> Self {
        Self {
            max_attempts: Some(2),
            ..Self::vendor_api_call()
        }
    }

    /// Whether another attempt is allowed after `attempts` completed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            None | Some(0) => true,
            Some(max) => attempts < max,
        }
    }
}

/// Build an `ExponentialBackoff` from a policy.
///
/// `max_attempts` is checked by the caller; the backoff only enforces the
/// delay curve and the optional elapsed-time limit.
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(policy.initial_interval_ms.max(1)),
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}
