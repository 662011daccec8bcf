//! Back-off schedule for provider rate limits.
//!
//! Each consecutive throttled request doubles the delay, starting from a base
//! and capped at a ceiling, with random jitter added so parallel instances do
//! not retry in lockstep. The schedule restarts once a request succeeds.

use std::time::Duration;

use rand::Rng;

/// Exponential back-off state for one instance.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitThrottle {
    base: Duration,
    cap: Duration,
    attempts: u32,
    jitter: bool,
}

impl RateLimitThrottle {
    /// Creates a schedule starting at `base` and never exceeding `cap`
    /// before jitter.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempts: 0,
            jitter: true,
        }
    }

    /// Disables random jitter so delays are exact.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Number of consecutive throttled requests seen since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay for the next throttled request and advances the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1_u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .base
            .checked_mul(factor)
            .map_or(self.cap, |scaled| scaled.min(self.cap));
        self.attempts = self.attempts.saturating_add(1);
        if !self.jitter {
            return delay;
        }
        let spread = u64::try_from((delay / 4).as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=spread);
        delay.saturating_add(Duration::from_millis(extra))
    }

    /// Restarts the schedule after a request went through.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 10)]
    #[case(1, 20)]
    #[case(2, 40)]
    #[case(4, 160)]
    #[case(5, 300)]
    #[case(40, 300)]
    fn delays_double_until_capped(#[case] prior_attempts: u32, #[case] expected_secs: u64) {
        let mut throttle =
            RateLimitThrottle::new(Duration::from_secs(10), Duration::from_secs(300))
                .without_jitter();
        for _ in 0..prior_attempts {
            throttle.next_delay();
        }
        assert_eq!(throttle.next_delay(), Duration::from_secs(expected_secs));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let mut throttle =
            RateLimitThrottle::new(Duration::from_secs(8), Duration::from_secs(300));
        let delay = throttle.next_delay();
        assert!(delay >= Duration::from_secs(8));
        assert!(delay <= Duration::from_secs(10));
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut throttle =
            RateLimitThrottle::new(Duration::from_secs(10), Duration::from_secs(300))
                .without_jitter();
        throttle.next_delay();
        throttle.next_delay();
        assert_eq!(throttle.attempts(), 2);
        throttle.reset();
        assert_eq!(throttle.next_delay(), Duration::from_secs(10));
    }
}
