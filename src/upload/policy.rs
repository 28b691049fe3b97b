//! Retry policy for resumable uploads
//!
//! Decides which failures are worth retrying and how long to wait between
//! attempts. A policy is plain data handed to each driver, so drivers with
//! different limits can run side by side.

use std::time::Duration;

use super::types::{FailureKind, MAX_RETRIES, RETRIABLE_STATUS_CODES};

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retriable,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retriable failures tolerated before giving up
    pub max_retries: u32,
    /// HTTP statuses treated as transient
    pub retriable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retriable_status_codes: RETRIABLE_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn classify(&self, kind: FailureKind) -> Classification {
        match kind {
            FailureKind::Transport => Classification::Retriable,
            FailureKind::Http { status } if self.retriable_status_codes.contains(&status) => {
                Classification::Retriable
            }
            FailureKind::Http { .. } | FailureKind::Protocol => Classification::Fatal,
        }
    }

    /// Upper bound of the wait before retry number `retry` (1-based)
    ///
    /// The ceiling doubles with every retry and is never capped.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        Duration::from_secs_f64(2f64.powi(retry as i32))
    }

    /// Jittered wait before retry number `retry`
    ///
    /// `jitter` is a uniform sample from `[0, 1)`; out-of-range samples are
    /// clamped into it.
    pub fn backoff_delay(&self, retry: u32, jitter: f64) -> Duration {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0 - f64::EPSILON)
        } else {
            0.0
        };
        self.backoff_ceiling(retry).mul_f64(jitter)
    }
}

/// Retry bookkeeping for a single upload
#[derive(Debug)]
pub struct RetryState {
    attempts: u32,
    max: u32,
}

impl RetryState {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    /// Retriable failures recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Count one retriable failure
    ///
    /// Returns the retry number to schedule, or `None` once the budget is
    /// spent. The counter never moves past `max`.
    pub fn record_failure(&mut self) -> Option<u32> {
        if self.attempts >= self.max {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }
}
