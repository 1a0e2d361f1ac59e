//! Backoff policy: exponential with full jitter.
//!
//! Attempt n sleeps a uniform random duration in `[0, min(500ms * 2^n, 30s)]`.
//! Five attempts total; a server-provided `Retry-After` overrides the jitter.

use std::time::Duration;

use filen_core::FilenError;
use rand::Rng;

pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Delay before retry number `attempt` (0-based: the delay after the first
/// failure is `backoff_delay(0)`).
pub fn backoff_delay(attempt: u32) -> Duration {
    let cap = BASE_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_DELAY_MS);
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
}

/// Delay to honor for a failed attempt: `Retry-After` when the server sent
/// one, jittered backoff otherwise.
pub fn delay_for(err: &FilenError, attempt: u32) -> Duration {
    match err {
        FilenError::RateLimited {
            retry_after: Some(after),
        } => *after,
        _ => backoff_delay(attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_cap() {
        for attempt in 0..10 {
            let cap = Duration::from_millis(
                (BASE_DELAY_MS * (1 << attempt.min(16) as u64)).min(MAX_DELAY_MS),
            );
            for _ in 0..50 {
                assert!(backoff_delay(attempt) <= cap);
            }
        }
    }

    #[test]
    fn cap_saturates_at_thirty_seconds() {
        for _ in 0..50 {
            assert!(backoff_delay(63) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn retry_after_wins() {
        let err = FilenError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(delay_for(&err, 0), Duration::from_secs(7));
    }

    #[test]
    fn transient_uses_backoff() {
        let err = FilenError::Transient("x".into());
        assert!(delay_for(&err, 0) <= Duration::from_millis(BASE_DELAY_MS));
    }
}
