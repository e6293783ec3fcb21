//! Retry/backoff and load-timeout policy

use crate::types::*;
use std::time::Duration;

/// Decision after a failed load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-attempt the same source after `delay`; `attempt` is 1-based
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted; blacklist the source
    GiveUp,
}

/// Exponential backoff, a pure function of the retries already made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// `base * 2^retry_count`, capped
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what to do after a failure, given retries already made
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Retry {
                attempt: retry_count + 1,
                delay: self.delay(retry_count),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Load timeout for the current network quality
pub fn load_timeout(config: &SessionConfig, quality: NetworkQuality) -> Duration {
    match quality {
        NetworkQuality::Poor => Duration::from_millis(config.poor_network_load_timeout_ms),
        NetworkQuality::Good | NetworkQuality::Unknown => {
            Duration::from_millis(config.load_timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_within_ceiling() {
        let policy = RetryPolicy::default();
        for retry_count in 0..policy.max_retries {
            assert_eq!(
                policy.delay(retry_count),
                Duration::from_millis(1000 * 2u64.pow(retry_count))
            );
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(8));
        assert_eq!(policy.delay(40), Duration::from_secs(8));
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::Retry {
                attempt: 3,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_load_timeout_by_quality() {
        let config = SessionConfig::default();
        assert_eq!(load_timeout(&config, NetworkQuality::Poor), Duration::from_secs(30));
        assert_eq!(load_timeout(&config, NetworkQuality::Good), Duration::from_secs(20));
        assert_eq!(load_timeout(&config, NetworkQuality::Unknown), Duration::from_secs(20));
    }
}
