//! Write Retry Policy
//!
//! Exponential backoff with jitter for individual store writes. Only
//! transport failures and coordinator timeouts are retried; a rejected
//! statement fails on the first attempt.
//!
//! ```text
//! attempt 1 ──fail──▶ sleep ~50ms ──▶ attempt 2 ──fail──▶ sleep ~100ms ──▶ attempt 3
//! ```

use std::time::Duration;

use rand::Rng;

/// Retry configuration for store writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRetryPolicy {
    /// Retries after the first attempt (default: 2).
    pub max_retries: u32,
    /// Backoff before the first retry (default: 50ms).
    pub initial_backoff: Duration,
    /// Ceiling for any single backoff (default: 2s).
    pub max_backoff: Duration,
    /// Growth factor between retries (default: 2.0).
    pub backoff_multiplier: f64,
    /// Randomization as a fraction of the backoff (default: 0.2).
    pub jitter_factor: f64,
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl WriteRetryPolicy {
    /// Default policy with a custom retry count.
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Never retry.
    #[must_use]
    pub fn none() -> Self {
        Self::with_retries(0)
    }
}

/// Produces successive backoff delays for one write.
#[derive(Debug)]
pub struct ExponentialBackoff {
    current_retry: u32,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Create a backoff sequence from a policy.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(policy: &WriteRetryPolicy) -> Self {
        Self {
            current_retry: 0,
            max_retries: policy.max_retries,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_retry >= self.max_retries {
            return None;
        }

        let base_ms = self.base_backoff_ms();
        let capped_ms = self.apply_jitter(base_ms).min(self.max_backoff_ms);
        self.current_retry += 1;

        Some(Duration::from_millis(capped_ms))
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.current_retry
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_retry as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let spread = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - spread).max(0.0);
        let max = backoff_ms as f64 + spread;
        rand::rng().random_range(min..=max) as u64
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn no_jitter(max_retries: u32) -> WriteRetryPolicy {
        WriteRetryPolicy {
            max_retries,
            jitter_factor: 0.0,
            ..WriteRetryPolicy::default()
        }
    }

    #[test]
    fn default_policy() {
        let policy = WriteRetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut backoff = ExponentialBackoff::new(&no_jitter(3));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.retries(), 3);
    }

    #[test]
    fn delays_are_capped() {
        let policy = WriteRetryPolicy {
            max_backoff: Duration::from_millis(120),
            ..no_jitter(5)
        };
        let mut backoff = ExponentialBackoff::new(&policy);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(120)));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = WriteRetryPolicy::with_retries(1);
        for _ in 0..100 {
            let delay = ExponentialBackoff::new(&policy).next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(60));
        }
    }

    #[test_case(0, 0 ; "no retries")]
    #[test_case(1, 1 ; "one retry")]
    #[test_case(4, 4 ; "four retries")]
    fn retry_budget(max_retries: u32, expected: usize) {
        let mut backoff = ExponentialBackoff::new(&no_jitter(max_retries));
        assert_eq!(std::iter::from_fn(|| backoff.next_backoff()).count(), expected);
    }
}
