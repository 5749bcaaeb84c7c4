//! Exponential backoff policy for delivery retries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Backoff schedule for failed delivery attempts.
///
/// The delay after attempt `n` is `min(cap, base * factor^(n-1))`, stretched
/// by a random jitter of up to `max_jitter` so that retries for many
/// webhooks failing at once do not land on the same instant.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Multiplier per subsequent attempt.
    pub factor: f64,
    /// Upper bound on the un-jittered delay.
    pub cap: Duration,
    /// Maximum jitter fraction (0.2 = up to +20%).
    pub max_jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            factor: 2.0,
            cap: Duration::from_secs(3600),
            max_jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Inclusive bounds on the jittered delay after the given attempt.
    #[must_use]
    pub fn delay_bounds(&self, attempt_number: i32) -> (Duration, Duration) {
        let exp = (attempt_number - 1).max(0);
        let raw = self.base.as_secs_f64() * self.factor.powi(exp);
        let capped = raw.min(self.cap.as_secs_f64());
        (
            Duration::from_secs_f64(capped),
            Duration::from_secs_f64(capped * (1.0 + self.max_jitter)),
        )
    }

    /// The jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt_number: i32) -> Duration {
        let (min, _) = self.delay_bounds(attempt_number);
        let jitter = if self.max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.max_jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64(min.as_secs_f64() * (1.0 + jitter))
    }

    /// Absolute timestamp at which the next attempt becomes due.
    #[must_use]
    pub fn next_retry_at(&self, attempt_number: i32) -> DateTime<Utc> {
        let delay = self.delay(attempt_number);
        let delay = chrono::Duration::from_std(delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(self.cap.as_secs() as i64));
        Utc::now() + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_is_about_thirty_seconds() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(1);
        assert!(delay >= Duration::from_secs(30));
        assert!(delay <= Duration::from_secs(36)); // 30s + 20% jitter
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        let (min2, max2) = policy.delay_bounds(2);
        let (min3, max3) = policy.delay_bounds(3);

        assert_eq!(min2, Duration::from_secs(60));
        assert_eq!(min3, Duration::from_secs(120));
        assert!(max2 <= Duration::from_secs(72));
        assert!(max3 <= Duration::from_secs(144));
    }

    #[test]
    fn test_delay_monotonically_increases_until_cap() {
        let policy = BackoffPolicy::default();

        // Below the cap, even a fully jittered delay for attempt n stays
        // under the un-jittered delay for attempt n+1 (jitter < factor - 1).
        for attempt in 1..=6 {
            let (_, prev_max) = policy.delay_bounds(attempt);
            let (next_min, _) = policy.delay_bounds(attempt + 1);
            if next_min < policy.cap {
                assert!(
                    next_min > prev_max,
                    "attempt {attempt}: {next_min:?} should exceed {prev_max:?}"
                );
            }
        }
    }

    #[test]
    fn test_delay_caps_at_one_hour() {
        let policy = BackoffPolicy::default();
        // 30 * 2^19 is far past the cap.
        let delay = policy.delay(20);
        assert!(delay >= Duration::from_secs(3600));
        assert!(delay <= Duration::from_secs(4320)); // cap + 20% jitter
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            max_jitter: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay(1), Duration::from_secs(30));
        assert_eq!(policy.delay(2), Duration::from_secs(60));
        assert_eq!(policy.delay(4), Duration::from_secs(240));
    }

    #[test]
    fn test_next_retry_at_is_in_the_future() {
        let policy = BackoffPolicy::default();
        let before = Utc::now();
        let at = policy.next_retry_at(1);

        let offset = at - before;
        assert!(offset >= chrono::Duration::seconds(29));
        assert!(offset <= chrono::Duration::seconds(37));
    }

    #[test]
    fn test_worst_case_chain_lifetime_is_bounded() {
        // Five attempts against the default policy keep the whole chain
        // under max_attempts * cap * (1 + jitter).
        let policy = BackoffPolicy::default();
        let total: f64 = (1..5)
            .map(|n| policy.delay_bounds(n).1.as_secs_f64())
            .sum();
        assert!(total < 5.0 * 3600.0 * 1.2);
    }
}
