use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Disposition;

/// Wait used between reconnect attempts when nothing else is configured.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// Delay curve between consecutive reconnect attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed { delay_ms: u64 },
    /// Doubling delay bounded by `max_delay_ms`. With `jitter`, each delay is
    /// drawn uniformly from the upper half of the computed value.
    Exponential {
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter: bool,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Backoff,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            backoff: Backoff::Fixed { delay_ms },
            max_attempts: None,
        }
    }

    pub fn exponential(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            backoff: Backoff::Exponential {
                base_delay_ms,
                max_delay_ms: max_delay_ms.max(base_delay_ms),
                jitter: false,
            },
            max_attempts: None,
        }
    }

    /// Enable jitter. No effect on fixed backoff.
    pub fn with_jitter(mut self) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = true;
        }
        self
    }

    /// Give up after `max_attempts` consecutive retries without progress.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once the
    /// attempt cap is reached.
    pub fn next_delay(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return None;
        }
        Some(self.delay_for_attempt(attempt, retry_after_hint_ms))
    }

    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let hinted = retry_after_hint_ms.unwrap_or(0);
        let millis = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms.max(hinted),
            Backoff::Exponential {
                base_delay_ms,
                max_delay_ms,
                jitter,
            } => {
                let shift = attempt.min(20);
                let multiplier = 1_u64 << shift;
                let calculated = base_delay_ms.saturating_mul(multiplier).min(max_delay_ms);
                let calculated = if jitter {
                    jittered(calculated)
                } else {
                    calculated
                };
                calculated.max(hinted).min(max_delay_ms.max(hinted))
            }
        };
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_INTERVAL_MS)
    }
}

fn jittered(calculated: u64) -> u64 {
    let floor = calculated / 2;
    if floor == calculated {
        return calculated;
    }
    rand::rng().random_range(floor..=calculated)
}

/// Retry policy chosen per [`Disposition`]. `Fatal` is never retried.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicies {
    pub transient: RetryPolicy,
    pub history_lost: RetryPolicy,
}

impl RetryPolicies {
    /// Use one policy for every retryable disposition.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            transient: policy,
            history_lost: policy,
        }
    }

    pub fn for_disposition(&self, disposition: Disposition) -> Option<&RetryPolicy> {
        match disposition {
            Disposition::Transient => Some(&self.transient),
            Disposition::HistoryLost => Some(&self.history_lost),
            Disposition::Fatal => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_fixed_five_seconds_without_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(),
            Backoff::Fixed {
                delay_ms: DEFAULT_RETRY_INTERVAL_MS
            }
        );
        assert_eq!(policy.max_attempts(), None);
        assert_eq!(
            policy.next_delay(10_000, None),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn starts_with_base_delay() {
        let policy = RetryPolicy::exponential(250, 8_000);
        assert_eq!(
            policy.delay_for_attempt(0, None),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn scales_exponentially_for_attempts() {
        let policy = RetryPolicy::exponential(100, 10_000);
        assert_eq!(
            policy.delay_for_attempt(3, None),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn caps_delay_at_max() {
        let policy = RetryPolicy::exponential(1_000, 4_000);
        assert_eq!(
            policy.delay_for_attempt(5, None),
            Duration::from_millis(4_000)
        );
    }

    #[test]
    fn honors_retry_after_hint_when_larger() {
        let policy = RetryPolicy::fixed(500);
        assert_eq!(
            policy.delay_for_attempt(1, Some(10_000)),
            Duration::from_millis(10_000)
        );
        assert_eq!(
            policy.delay_for_attempt(1, Some(100)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let policy = RetryPolicy::exponential(1_000, 60_000).with_jitter();
        for _ in 0..200 {
            let delay = policy.delay_for_attempt(2, None);
            assert!(delay >= Duration::from_millis(2_000), "{delay:?}");
            assert!(delay <= Duration::from_millis(4_000), "{delay:?}");
        }
    }

    #[test]
    fn capped_policy_gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(10).with_max_attempts(2);
        assert!(policy.next_delay(0, None).is_some());
        assert!(policy.next_delay(1, None).is_some());
        assert_eq!(policy.next_delay(2, None), None);
    }

    #[test]
    fn fatal_disposition_has_no_policy() {
        let policies = RetryPolicies::uniform(RetryPolicy::fixed(1));
        assert!(policies.for_disposition(Disposition::Transient).is_some());
        assert!(policies.for_disposition(Disposition::HistoryLost).is_some());
        assert!(policies.for_disposition(Disposition::Fatal).is_none());
    }
}
