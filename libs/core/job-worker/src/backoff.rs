//! Job-level retry delay
//!
//! `delay(a) = min(max, base * 2^(a-1))`, plus jitter drawn uniformly from
//! `[0, 0.2 * delay]`. Jitter is only ever added.

use rand::Rng;
use std::time::Duration;

const JITTER_RATIO: f64 = 0.2;

/// Exponential backoff with additive jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Capped exponential delay without jitter. Attempt 0 is treated as 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let delay = base_ms.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay.min(max_ms))
    }

    /// Delay to wait before publishing attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let jitter = rand::rng().random_range(0.0..=JITTER_RATIO);
        delay + delay.mul_f64(jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(500, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let backoff = Backoff::from_millis(500, 5_000);
        assert_eq!(backoff.base_delay(1), Duration::from_millis(500));
        assert_eq!(backoff.base_delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(2_000));
        assert_eq!(backoff.base_delay(4), Duration::from_millis(4_000));
        assert_eq!(backoff.base_delay(5), Duration::from_millis(5_000));
        assert_eq!(backoff.base_delay(40), Duration::from_millis(5_000));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let backoff = Backoff::from_millis(500, 5_000);
        assert_eq!(backoff.base_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_bounds() {
        let backoff = Backoff::from_millis(500, 5_000);
        for attempt in 1..=12u32 {
            let uncapped = 500u64.saturating_mul(2u64.pow(attempt - 1));
            let lower = Duration::from_millis(uncapped.min(5_000));
            let upper = 5.0 * 1.2 + 1e-6;
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= lower, "attempt {attempt}: {delay:?} < {lower:?}");
                assert!(delay.as_secs_f64() <= upper, "attempt {attempt}: {delay:?}");
                assert!(
                    delay.as_secs_f64() <= backoff.base_delay(attempt).as_secs_f64() * 1.2 + 1e-6
                );
            }
        }
    }

    #[test]
    fn test_base_delay_is_monotonic() {
        let backoff = Backoff::from_millis(250, 30_000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = backoff.base_delay(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_max_never_below_base() {
        let backoff = Backoff::from_millis(2_000, 100);
        assert_eq!(backoff.max(), Duration::from_millis(2_000));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(2_000));
    }
}
