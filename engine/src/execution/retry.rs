//! Retry policy with exponential backoff.

use super::connection::EngineFailure;
use std::time::Duration;

/// Decides whether and when a failed attempt is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    retryable: fn(&EngineFailure) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), 2.0)
    }
}

impl RetryPolicy {
    /// Creates a policy using the failure's own classification.
    ///
    /// `max_attempts` is clamped to at least one and `backoff_multiplier` to
    /// at least `1.0`.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_multiplier: if backoff_multiplier.is_finite() {
                backoff_multiplier.max(1.0)
            } else {
                1.0
            },
            retryable: EngineFailure::is_retryable,
        }
    }

    /// Replaces the retryable-failure predicate.
    #[must_use]
    pub fn with_predicate(mut self, retryable: fn(&EngineFailure) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Factor applied to the delay after each retry.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Delay to wait after failed attempt number `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::execution::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    /// assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Returns true if `failure` on attempt number `attempt` should be retried.
    #[must_use]
    pub fn should_retry(&self, failure: &EngineFailure, attempt: u32) -> bool {
        attempt < self.max_attempts && (self.retryable)(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50), 3.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for(3), Duration::from_millis(450));
    }

    #[test]
    fn test_constant_delay_with_unit_multiplier() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 1.0);
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 10.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_attempts_are_at_least_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, 0.5);
        assert_eq!(policy.max_attempts(), 1);
        assert!((policy.backoff_multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let transient = EngineFailure::LockTimeout("busy".to_string());
        let fatal = EngineFailure::Syntax("bad".to_string());

        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&fatal, 1));
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::default().with_predicate(|_| false);
        assert!(!policy.should_retry(&EngineFailure::Unreachable(String::new()), 1));
    }
}
