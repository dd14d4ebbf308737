//! Retry policy for upload attempts.
//!
//! Pure decision logic: classifies remote failures, computes backoff, and
//! decides whether another attempt is allowed.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::adapters::RemoteError;

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The client could not reach the server. Revert to `local` without
    /// consuming budget; recovery is left to the connectivity monitor.
    Network,

    /// Transient server trouble (5xx, 408, 429)
    Retryable,

    /// The server rejected the request for good
    Permanent,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Go back to `local` and restore the previous attempt count
    Defer,

    /// Sleep, then run the next attempt
    RetryAfter(Duration),

    /// Mark the recording `failed`
    GiveUp,
}

/// Retry policy for uploads.
///
/// The default jitter multiplier is drawn from `[1.0, 1.5)` rather than a
/// range centred on 1.0, so the second attempt waits 2-3 s and the third
/// 4-6 s with the default 1 s base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Lower bound of the jitter multiplier (inclusive)
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,

    /// Upper bound of the jitter multiplier (exclusive)
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_jitter_min() -> f64 {
    1.0
}
fn default_jitter_max() -> f64 {
    1.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
        }
    }
}

impl RetryPolicy {
    /// Classify a remote failure
    pub fn classify(&self, error: &RemoteError) -> FailureClass {
        match error {
            RemoteError::Network(_) => FailureClass::Network,
            RemoteError::Server { status, .. } => {
                if is_transient_status(*status) {
                    FailureClass::Retryable
                } else {
                    FailureClass::Permanent
                }
            }
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Whether the budget is already spent
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Backoff before attempt `attempt` (1-indexed):
    /// `base * 2^(attempt-1) * jitter`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let exponential = self.base_delay_ms as f64 * 2f64.powi(exp);

        let jitter = if self.jitter_max > self.jitter_min {
            rand::rng().random_range(self.jitter_min..self.jitter_max)
        } else {
            self.jitter_min
        };

        Duration::from_millis((exponential * jitter).max(0.0) as u64)
    }

    /// Decide what follows a failed attempt, given how many have been made
    pub fn decide(&self, error: &RemoteError, attempts: u32) -> RetryDecision {
        match self.classify(error) {
            FailureClass::Network => RetryDecision::Defer,
            FailureClass::Retryable if self.should_retry(attempts) => {
                RetryDecision::RetryAfter(self.delay_for_attempt(attempts + 1))
            }
            _ => RetryDecision::GiveUp,
        }
    }
}

/// 5xx, request timeout and rate limiting are worth retrying
pub fn is_transient_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(status: u16) -> RemoteError {
        RemoteError::Server {
            status,
            message: format!("HTTP {}", status),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!((policy.jitter_min, policy.jitter_max), (1.0, 1.5));
    }

    #[test]
    fn test_classification() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.classify(&RemoteError::Network("connection refused".into())),
            FailureClass::Network
        );
        for status in [500, 502, 503, 504, 408, 429] {
            assert_eq!(policy.classify(&server(status)), FailureClass::Retryable, "{}", status);
        }
        for status in [400, 401, 403, 404, 409, 413, 422] {
            assert_eq!(policy.classify(&server(status)), FailureClass::Permanent, "{}", status);
        }
    }

    #[test]
    fn test_backoff_ranges() {
        let policy = RetryPolicy::default();

        for _ in 0..200 {
            let second = policy.delay_for_attempt(2).as_millis();
            assert!((2000..3000).contains(&second), "attempt 2 delay {}", second);

            let third = policy.delay_for_attempt(3).as_millis();
            assert!((4000..6000).contains(&third), "attempt 3 delay {}", third);
        }
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(&RemoteError::Network("timed out".into()), 1),
            RetryDecision::Defer
        );
        assert!(matches!(
            policy.decide(&server(503), 1),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(&server(503), 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&server(403), 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_fixed_jitter() {
        let policy = RetryPolicy {
            base_delay_ms: 10,
            jitter_min: 1.0,
            jitter_max: 1.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(80));
    }
}
