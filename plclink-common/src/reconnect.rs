//! Delay schedule shared by every long-lived connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backoff", rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// Delay doubles after every failed attempt, capped at `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        ReconnectPolicy::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        ReconnectPolicy::Exponential {
            initial_ms: initial.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        }
    }

    /// Reject schedules that would retry in a tight loop.
    pub fn validate(&self, field: &str) -> Result<()> {
        match *self {
            ReconnectPolicy::Fixed { delay_ms: 0 } => Err(Error::Config(format!(
                "{field}.delay_ms must be positive"
            ))),
            ReconnectPolicy::Exponential { initial_ms: 0, .. } => Err(Error::Config(format!(
                "{field}.initial_ms must be positive"
            ))),
            ReconnectPolicy::Exponential { initial_ms, max_ms } if max_ms < initial_ms => {
                Err(Error::Config(format!(
                    "{field}.max_ms ({max_ms}) must not be below initial_ms ({initial_ms})"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::Exponential { initial_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(20);
                let delay = initial_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay.min(max_ms.max(initial_ms)))
            }
        }
    }

    /// Start a fresh attempt counter.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Attempt counter driving a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.policy.delay_for(self.attempts)
    }

    /// Number of failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forget previous failures (call after a successful connection).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
