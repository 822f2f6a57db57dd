//! # Reconnect backoff (§4.6, §8 invariant 5)
//!
//! `delay = min(base * 2^attempt, max) + jitter`, jitter uniform in
//! `[0, 1s)`. Split into a pure function (`delay_for`) so the exponent math
//! and cap are unit-testable without touching the RNG, and a thin public
//! wrapper (`next_delay`) that plugs in real jitter for the reconnect loop.

use rand::Rng;
use std::time::Duration;

const JITTER_CEIL_MS: u64 = 1000;

/// Pure backoff computation: `attempt` is the number of reconnect attempts
/// already made (0 on the very first failure), `jitter_ms` is in
/// `[0, 1000)`. Exposed separately from [`next_delay`] so tests can pin the
/// jitter and assert exact bounds.
pub fn delay_for(attempt: u32, base: Duration, max: Duration, jitter_ms: u64) -> Duration {
    let exp = 2u64.saturating_pow(attempt.min(32));
    let scaled = base.saturating_mul(exp.min(u32::MAX as u64) as u32);
    scaled.min(max) + Duration::from_millis(jitter_ms)
}

/// The delay the reconnect loop should actually sleep before attempt
/// number `attempt`, with real jitter drawn from `[0, 1000)` ms.
pub fn next_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..JITTER_CEIL_MS);
    delay_for(attempt, base, max, jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_until_the_cap() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(delay_for(0, base, max, 0), Duration::from_secs(5));
        assert_eq!(delay_for(1, base, max, 0), Duration::from_secs(10));
        assert_eq!(delay_for(2, base, max, 0), Duration::from_secs(20));
        assert_eq!(delay_for(3, base, max, 0), Duration::from_secs(40));
        // 5 * 2^4 = 80s, capped at 60s.
        assert_eq!(delay_for(4, base, max, 0), Duration::from_secs(60));
    }

    #[test]
    fn jitter_is_additive_and_bounded() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        let d = delay_for(1, base, max, 999);
        assert_eq!(d, Duration::from_millis(10_000 + 999));
    }

    #[test]
    fn real_jitter_always_falls_within_the_documented_window() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        for _ in 0..50 {
            let d = next_delay(1, base, max);
            assert!(d >= Duration::from_secs(10));
            assert!(d < Duration::from_millis(10_000 + 1000));
        }
    }
}
