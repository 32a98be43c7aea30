//! Retry backoff and the inference pause breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Bounded exponential backoff for `BackendUnavailable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total inference attempts per datatype, including the first (>= 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt (milliseconds).
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (milliseconds).
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Pauses claiming after consecutive images failed only because the
/// inference backend was unreachable.
///
/// Once open, claiming stays paused for `cooldown`; then exactly one caller
/// is admitted as a trial. A success closes the breaker, another all-unavailable
/// image re-arms the cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// `threshold == 0` disables the breaker.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
            cooldown,
            opened_at: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive_failures.load(Ordering::Relaxed) >= self.threshold
    }

    /// Record an all-unavailable image. Returns the consecutive count.
    pub fn record_failure(&self) -> u32 {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.threshold > 0 && count >= self.threshold {
            *self.lock() = Some(Instant::now());
        }
        count
    }

    /// Record an image that reached the backend.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.lock() = None;
    }

    /// `Ok` if the caller may claim an image now, else the remaining pause.
    pub fn admit(&self) -> Result<(), Duration> {
        if !self.is_open() {
            return Ok(());
        }
        let mut opened_at = self.lock();
        let now = Instant::now();
        match *opened_at {
            Some(at) if now.duration_since(at) < self.cooldown => {
                Err(self.cooldown - now.duration_since(at))
            }
            _ => {
                // Trial admission: re-arm so concurrent callers stay paused.
                *opened_at = Some(now);
                Ok(())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.opened_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_three_attempts_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 50,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        };
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(49), Duration::from_secs(5));
    }

    #[test]
    fn breaker_opens_at_threshold_and_resets_on_success() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert!(!cb.is_open());
        // Counting starts over.
        assert_eq!(cb.record_failure(), 1);
        assert!(!cb.is_open());
    }

    #[test]
    fn zero_threshold_never_opens() {
        let cb = CircuitBreaker::new(0, Duration::from_secs(60));
        for _ in 0..10 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
        assert!(cb.admit().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_admits_one_trial_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.record_failure();

        let remaining = cb.admit().unwrap_err();
        assert!(remaining <= Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.admit().is_ok(), "first caller after cooldown is the trial");
        assert!(cb.admit().is_err(), "others wait for the trial outcome");

        cb.record_success();
        assert!(cb.admit().is_ok());
    }
}
