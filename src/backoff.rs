//! Delay between refresh cycles.
use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::config::RefresherConfig;

/// Tracks consecutive refresh failures and computes the delay before the next cycle:
/// `interval` while healthy, `min(interval * 2^failures, max_backoff)` after failures.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    interval: Duration,
    max_backoff: Duration,
    jitter: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &RefresherConfig) -> Backoff {
        Backoff {
            interval: config.interval,
            max_backoff: config.max_backoff,
            jitter: config.jitter,
            failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failed cycle and return the number of consecutive failures.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    /// Delay before the next cycle, without jitter.
    pub fn base_delay(&self) -> Duration {
        if self.failures == 0 {
            return self.interval;
        }
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.interval.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn next_delay(&self) -> Duration {
        jitter(self.base_delay(), self.jitter)
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Backoff;
    use crate::config::RefresherConfig;

    fn backoff() -> Backoff {
        Backoff::new(
            &RefresherConfig::new()
                .with_interval(Duration::from_secs(10))
                .with_max_backoff(Duration::from_secs(300))
                .with_jitter(Duration::ZERO),
        )
    }

    #[test]
    fn healthy_delay_is_interval() {
        let backoff = backoff();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn delay_doubles_per_failure_up_to_max() {
        let mut backoff = backoff();
        let delays: Vec<_> = (0..6)
            .map(|_| {
                backoff.record_failure();
                backoff.base_delay().as_secs()
            })
            .collect();
        assert_eq!(delays, vec![20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn many_failures_do_not_overflow() {
        let mut backoff = backoff();
        for _ in 0..100 {
            backoff.record_failure();
        }
        assert_eq!(backoff.base_delay(), Duration::from_secs(300));
    }

    #[test]
    fn reset_restores_interval() {
        let mut backoff = backoff();
        backoff.record_failure();
        assert_eq!(backoff.record_failure(), 2);
        backoff.reset();
        assert_eq!(backoff.record_failure(), 1);
        backoff.reset();
        assert_eq!(backoff.base_delay(), Duration::from_secs(10));
    }

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(30);

        let result = super::jitter(interval, jitter);

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        let result = super::jitter(Duration::ZERO, Duration::from_secs(30));

        assert_eq!(result, Duration::ZERO);
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let result = super::jitter(Duration::from_secs(30), Duration::ZERO);

        assert_eq!(result, Duration::from_secs(30));
    }
}
