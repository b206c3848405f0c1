// Retry policy for confirmation delivery
//
// Exponential backoff with additive jitter, capped. A provider failure is
// either retryable (network, timeout, 5xx, 429) or permanent (the provider
// rejected the message itself); permanent failures exhaust the item
// immediately without consuming remaining attempts.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::config::DeliverySettings;

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after this delay
    Retry(Duration),
    /// Stop retrying; the item is exhausted
    GiveUp,
}

/// Backoff parameters, derived from delivery settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the first retry
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Attempts allowed per item, including the first
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
            max_attempts: settings.max_attempts,
        }
    }

    /// Decide the next step after `attempts_made` failed attempts
    ///
    /// Delay is `base * 2^(attempts_made - 1)` plus up to 20% jitter,
    /// capped at `max_delay`. Jitter only ever lengthens the delay, so the
    /// nominal backoff is a lower bound.
    pub fn next_delay(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            debug!(
                "Retries exhausted after {} of {} attempts",
                attempts_made, self.max_attempts
            );
            return RetryDecision::GiveUp;
        }

        let exponent = attempts_made.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let nominal_ms = base_ms.saturating_mul(1u64 << exponent);

        let jitter_ms = if nominal_ms > 0 {
            let ceiling = nominal_ms / 5;
            rand::rng().random_range(0..=ceiling)
        } else {
            0
        };

        let delay_ms = nominal_ms
            .saturating_add(jitter_ms)
            .min(self.max_delay.as_millis() as u64);

        RetryDecision::Retry(Duration::from_millis(delay_ms))
    }

    /// Nominal (jitter-free) delay after `attempts_made` failures
    pub fn nominal_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let nominal_ms = base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(nominal_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = policy(1_000, 300_000, 5);

        // After one failure: 1s nominal, jitter adds at most 20%.
        match policy.next_delay(1) {
            RetryDecision::Retry(d) => {
                assert!(d >= Duration::from_millis(1_000));
                assert!(d <= Duration::from_millis(1_200));
            }
            RetryDecision::GiveUp => panic!("expected retry"),
        }

        // After two failures: 2s nominal.
        match policy.next_delay(2) {
            RetryDecision::Retry(d) => {
                assert!(d >= Duration::from_millis(2_000));
                assert!(d <= Duration::from_millis(2_400));
            }
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_gives_up_at_max_attempts() {
        let policy = policy(1_000, 300_000, 3);
        assert_eq!(policy.next_delay(3), RetryDecision::GiveUp);
        assert_eq!(policy.next_delay(4), RetryDecision::GiveUp);
    }

    #[test]
    fn test_delay_capped() {
        let policy = policy(60_000, 100_000, 10);
        match policy.next_delay(9) {
            RetryDecision::Retry(d) => assert_eq!(d, Duration::from_millis(100_000)),
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_nominal_delay_is_lower_bound() {
        let policy = policy(500, 300_000, 5);
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(500));
        assert_eq!(policy.nominal_delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(2_000));

        for attempts in 1..4 {
            match policy.next_delay(attempts) {
                RetryDecision::Retry(d) => assert!(d >= policy.nominal_delay(attempts)),
                RetryDecision::GiveUp => panic!("expected retry"),
            }
        }
    }
}
