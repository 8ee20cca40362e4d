//! Retry backoff calculation.

use std::time::Duration;

use crate::types::BackoffStrategy;

/// Compute the delay before the given attempt.
///
/// Attempts are zero-based; the first attempt (attempt 0) never waits.
/// For attempt `a >= 1`:
///
/// - `None` — zero
/// - `Linear` — `base * a`
/// - `Exponential` — `base * 2^(a - 1)`
///
/// Overflow saturates rather than wrapping.
pub fn backoff_delay(base_delay_ms: u64, attempt: u32, strategy: BackoffStrategy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let millis = match strategy {
        BackoffStrategy::None => 0,
        BackoffStrategy::Linear => base_delay_ms.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
            base_delay_ms.saturating_mul(multiplier)
        }
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_zero_is_always_immediate() {
        for strategy in [
            BackoffStrategy::None,
            BackoffStrategy::Linear,
            BackoffStrategy::Exponential,
        ] {
            assert_eq!(backoff_delay(1000, 0, strategy), Duration::ZERO);
        }
    }

    #[test]
    fn none_is_always_zero() {
        for attempt in 0..8 {
            assert_eq!(
                backoff_delay(1000, attempt, BackoffStrategy::None),
                Duration::ZERO
            );
        }
    }

    #[test]
    fn linear_scales_with_attempt() {
        assert_eq!(
            backoff_delay(200, 1, BackoffStrategy::Linear),
            Duration::from_millis(200)
        );
        assert_eq!(
            backoff_delay(200, 2, BackoffStrategy::Linear),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff_delay(200, 3, BackoffStrategy::Linear),
            Duration::from_millis(600)
        );
    }

    #[test]
    fn exponential_doubles_per_attempt() {
        assert_eq!(
            backoff_delay(100, 1, BackoffStrategy::Exponential),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff_delay(100, 2, BackoffStrategy::Exponential),
            Duration::from_millis(200)
        );
        assert_eq!(
            backoff_delay(100, 3, BackoffStrategy::Exponential),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff_delay(100, 4, BackoffStrategy::Exponential),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn exponential_saturates_on_large_attempts() {
        let d = backoff_delay(u64::MAX, 80, BackoffStrategy::Exponential);
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }
}
