//! Exponential backoff for reconnection

use std::time::Duration;

use fb_core::config::BackoffConfig;

/// Exponential backoff with optional jitter for reconnection attempts.
///
/// The `n`th delay after a reset (counting from 1) is
/// `min(initial * multiplier^(n-1), max)`, plus up to `jitter` of itself,
/// and never more than `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
    failures: u32,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
            jitter,
            failures: 0,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.failures = self.failures.saturating_add(1);

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = next.min(self.max);

        if self.jitter > 0.0 {
            let extra = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
            (delay + Duration::from_secs_f64(extra)).min(self.max)
        } else {
            delay
        }
    }

    /// Back to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let mut backoff = ExponentialBackoff::from_config(&BackoffConfig::default());

        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80]);
        assert_eq!(backoff.failures(), 5);
    }

    #[test]
    fn test_backoff_max() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(60), 2.0, 0.0);

        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_backoff_caps_at_five_minutes() {
        let mut backoff = ExponentialBackoff::from_config(&BackoffConfig::default());
        let last = (0..10).map(|_| backoff.next_delay()).last().unwrap();
        assert_eq!(last, Duration::from_secs(300));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ExponentialBackoff::from_config(&BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_only_adds() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(60), 2.0, 0.5);
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_secs(15));
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(20), 2.0, 1.0);
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_secs(20));
        }
    }
}
