//! Retry policy for platform calls
//!
//! Pure decision function mapping (attempt, failure kind) to either a
//! backoff delay or giving up. Workers own the side effects.

use std::time::Duration;

use rand::Rng;

use crate::types::FailureKind;

const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Exponential backoff with jitter, capped per attempt and in total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt `attempt` (1-based) failed with
    /// `kind`. Permanent failures and exhausted budgets give up; transient
    /// failures back off with `base * 2^(attempt-1)`, capped at the max
    /// delay and jittered by +/-20%.
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Permanent || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let exp = attempt.saturating_sub(1).min(31);
        let uncapped = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        let capped = uncapped.min(self.max_delay);

        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let delayed = capped.mul_f64(1.0 + jitter);

        RetryDecision::RetryAfter(delayed)
    }
}
