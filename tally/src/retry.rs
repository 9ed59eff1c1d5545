use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::job::{millis, BackoffStrategy, JobOptions};

/// Computes the delay before the retry that follows execution `attempts`.
///
/// Formula:
/// - fixed: `base`
/// - exponential: `base * 2^(attempts-1)`, saturating at `u64::MAX` ms
///
/// # Arguments
/// * `strategy` - The configured backoff strategy
/// * `base_delay_ms` - The base delay in milliseconds
/// * `attempts` - Executions made so far (the failed one included)
pub fn compute_backoff_delay(
    strategy: BackoffStrategy,
    base_delay_ms: u64,
    attempts: u32,
) -> Duration {
    millis(backoff_delay_ms(strategy, base_delay_ms, attempts))
}

/// Millisecond form of [`compute_backoff_delay`].
pub fn backoff_delay_ms(strategy: BackoffStrategy, base_delay_ms: u64, attempts: u32) -> u64 {
    match strategy {
        BackoffStrategy::Fixed => base_delay_ms,
        BackoffStrategy::Exponential => {
            let exp = attempts.saturating_sub(1);
            let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
            base_delay_ms.saturating_mul(factor)
        }
    }
}

/// Determines if a job has used up its attempts budget.
///
/// Returns true when attempts >= max_attempts.
pub fn should_fail_permanently(attempts: u32, max_attempts: u32) -> bool {
    attempts >= max_attempts
}

/// What to do with a job whose execution just failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RetryDecision {
    /// Re-delay the job for another execution.
    Retry {
        /// Delay in milliseconds before the job becomes eligible again.
        delay_ms: u64,
    },
    /// The attempts budget is exhausted; the job is terminal.
    Exhausted,
}

/// Decides between retry and permanent failure after a failed execution.
///
/// - If attempts < options.attempts: compute backoff and retry
/// - Otherwise: exhausted
pub fn decide_retry(attempts: u32, options: &JobOptions) -> RetryDecision {
    if should_fail_permanently(attempts, options.attempts) {
        RetryDecision::Exhausted
    } else {
        RetryDecision::Retry {
            delay_ms: backoff_delay_ms(options.backoff, options.backoff_delay_ms, attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        // Nth retry follows execution N: base * 2^(N-1)
        let delay1 = compute_backoff_delay(BackoffStrategy::Exponential, 1000, 1);
        assert_eq!(delay1.num_milliseconds(), 1000);

        let delay2 = compute_backoff_delay(BackoffStrategy::Exponential, 1000, 2);
        assert_eq!(delay2.num_milliseconds(), 2000);

        let delay3 = compute_backoff_delay(BackoffStrategy::Exponential, 1000, 3);
        assert_eq!(delay3.num_milliseconds(), 4000);
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        for attempts in 1..10 {
            assert_eq!(backoff_delay_ms(BackoffStrategy::Fixed, 10, attempts), 10);
        }
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        assert_eq!(
            backoff_delay_ms(BackoffStrategy::Exponential, 1000, 80),
            u64::MAX
        );
        let delay = compute_backoff_delay(BackoffStrategy::Exponential, 1000, 80);
        assert_eq!(delay.num_milliseconds(), i64::MAX);
    }

    #[test]
    fn test_should_fail_permanently() {
        assert!(!should_fail_permanently(0, 3));
        assert!(!should_fail_permanently(1, 3));
        assert!(!should_fail_permanently(2, 3));
        assert!(should_fail_permanently(3, 3));
        assert!(should_fail_permanently(4, 3));
    }

    #[test]
    fn test_decide_retry_until_exhausted() {
        let options = JobOptions {
            attempts: 3,
            backoff_delay_ms: 100,
            ..Default::default()
        };

        assert_eq!(decide_retry(1, &options), RetryDecision::Retry { delay_ms: 100 });
        assert_eq!(decide_retry(2, &options), RetryDecision::Retry { delay_ms: 200 });
        assert_eq!(decide_retry(3, &options), RetryDecision::Exhausted);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let options = JobOptions {
            attempts: 1,
            ..Default::default()
        };
        assert_eq!(decide_retry(1, &options), RetryDecision::Exhausted);
    }
}
