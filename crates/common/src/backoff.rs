use rand::Rng;
use std::time::Duration;

const DEFAULT_BASE: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_JITTER: f64 = 0.1;

/// Reconnect delay schedule: `min(max_delay, base * 2^attempt)` plus symmetric jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX_DELAY, DEFAULT_JITTER)
    }
}

impl ExponentialBackoff {
    /// `jitter_factor` is a fraction of the delay, clamped to `[0, 1]`.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay for the current attempt without jitter.
    pub fn current_delay(&self) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max_delay)
    }

    /// Returns the delay to sleep before the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        let spread = delay.as_secs_f64() * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }

    /// Call after a connection has stayed up long enough to count as recovered.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0)
    }

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = no_jitter();
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = no_jitter();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(60), 0.2);
        for _ in 0..20 {
            backoff.reset();
            let secs = backoff.next_delay().as_secs_f64();
            assert!((8.0..=12.0).contains(&secs), "delay was {}", secs);
        }
    }

    #[test]
    fn test_jitter_factor_clamped() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), -3.0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let mut backoff = no_jitter();
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
    }
}
