//! Retry delay calculation for the delivery queue.
//!
//! Delay for attempt n (1-based) is
//! `min(initial_delay · multiplier^(n-1) + uniform[0, jitter_cap], max_delay)`
//! with `max_delay` capped at five minutes.

use std::time::Duration;

use rand::Rng;

/// Hard ceiling on any retry delay
pub const MAX_RETRY_DELAY_MS: u64 = 300_000;

/// Deterministic part of the retry delay for a given attempt.
///
/// `attempt` is 1-based: the delay scheduled after the first failed
/// attempt uses `attempt = 1`.
#[must_use]
pub fn base_delay_ms(attempt: u32, initial_delay_ms: u64, multiplier: f64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = multiplier.max(1.0).powi(exponent as i32);
    let delay = (initial_delay_ms as f64 * factor).min(MAX_RETRY_DELAY_MS as f64);
    delay as u64
}

/// Full retry delay including jitter, capped at `max_delay_ms` and the
/// five-minute ceiling.
#[must_use]
pub fn retry_delay(
    attempt: u32,
    initial_delay_ms: u64,
    multiplier: f64,
    jitter_cap_ms: u64,
    max_delay_ms: u64,
) -> Duration {
    let base = base_delay_ms(attempt, initial_delay_ms, multiplier);
    let jitter = if jitter_cap_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap_ms)
    };
    let capped = (base.saturating_add(jitter))
        .min(max_delay_ms)
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(capped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_delay_grows_exponentially() {
        assert_eq!(base_delay_ms(1, 100, 2.0), 100);
        assert_eq!(base_delay_ms(2, 100, 2.0), 200);
        assert_eq!(base_delay_ms(3, 100, 2.0), 400);
        assert_eq!(base_delay_ms(4, 100, 2.0), 800);
    }

    #[test]
    fn test_base_delay_caps_at_five_minutes() {
        assert_eq!(base_delay_ms(30, 1_000, 2.0), MAX_RETRY_DELAY_MS);
    }

    #[test]
    fn test_unit_multiplier_is_constant() {
        assert_eq!(base_delay_ms(1, 500, 1.0), 500);
        assert_eq!(base_delay_ms(7, 500, 1.0), 500);
    }

    #[test]
    fn test_retry_delay_without_jitter_is_base() {
        let d = retry_delay(3, 100, 2.0, 0, MAX_RETRY_DELAY_MS);
        assert_eq!(d.as_millis(), 400);
    }

    #[test]
    fn test_retry_delay_respects_explicit_cap() {
        let d = retry_delay(10, 1_000, 2.0, 0, 5_000);
        assert_eq!(d.as_millis(), 5_000);
    }

    proptest! {
        // initial · multiplier^(n-1) ≤ delay ≤ initial · multiplier^(n-1) + jitter_cap,
        // and delay ≤ 300 000 ms
        #[test]
        fn prop_delay_bounds(
            attempt in 1u32..10,
            initial in 100u64..5_000,
            multiplier in 1.0f64..10.0,
            jitter_cap in 0u64..2_000,
        ) {
            let base = base_delay_ms(attempt, initial, multiplier);
            let delay = retry_delay(attempt, initial, multiplier, jitter_cap, MAX_RETRY_DELAY_MS)
                .as_millis() as u64;

            prop_assert!(delay <= MAX_RETRY_DELAY_MS);
            if base.saturating_add(jitter_cap) <= MAX_RETRY_DELAY_MS {
                prop_assert!(delay >= base);
                prop_assert!(delay <= base + jitter_cap);
            }
        }
    }
}
