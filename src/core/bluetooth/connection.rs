//! Reconnect policy for the central session
//! Decides how long to wait before the next automatic attempt after a failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_RECONNECT_INITIAL_DELAY_MS, DEFAULT_RECONNECT_MAX_DELAY_MS, MIN_RECONNECT_DELAY_MS,
};

/// Bounded exponential backoff.
///
/// The first restart after a failure is immediate. Each further consecutive
/// failure waits `initial_delay_ms * multiplier^(n-2)`, capped at
/// `max_delay_ms` and never below `MIN_RECONNECT_DELAY_MS`, so a zero
/// `initial_delay_ms` cannot turn into a busy retry loop. With `max_attempts` set, restarts stop after that many
/// consecutive failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the restart that follows the `failures`-th consecutive
    /// failure, or `None` once the attempt budget is spent.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if failures > max {
                return None;
            }
        }
        if failures <= 1 {
            return Some(Duration::ZERO);
        }

        let exponent = i32::try_from(failures - 2).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled
            .min(self.max_delay_ms as f64)
            .max(MIN_RECONNECT_DELAY_MS as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

/// Counts consecutive failures against a policy
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    failures: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Registers one more failure and returns the delay before retrying
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay_for(self.failures)
    }

    /// Called once a link is fully usable
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
