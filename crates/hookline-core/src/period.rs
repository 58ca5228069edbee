//! Statistics period strings (`7d`, `24h`, `1y`).
//!
//! A period is a non-negative integer followed by one unit letter:
//! h (hours), d (days), w (weeks), m (30-day months), y (365-day years).

use std::time::Duration;

use crate::error::{RelayError, Result};

const HOUR_SECS: u64 = 3_600;
const DAY_SECS: u64 = 86_400;

/// Parse a period string into a duration.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] for anything not matching
/// `^\d+[hdwmy]$`.
pub fn parse_period(raw: &str) -> Result<Duration> {
    let invalid = || {
        RelayError::validation(format!(
            "invalid period '{raw}': expected <number><h|d|w|m|y>"
        ))
    };

    if raw.len() < 2 || !raw.is_ascii() {
        return Err(invalid());
    }

    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let count: u64 = digits.parse().map_err(|_| invalid())?;
    let unit_secs = match unit {
        "h" => HOUR_SECS,
        "d" => DAY_SECS,
        "w" => 7 * DAY_SECS,
        "m" => 30 * DAY_SECS,
        "y" => 365 * DAY_SECS,
        _ => return Err(invalid()),
    };

    Ok(Duration::from_secs(count.saturating_mul(unit_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_transitions() {
        assert_eq!(parse_period("1h").unwrap().as_millis(), 3_600_000);
        assert_eq!(parse_period("7d").unwrap().as_millis(), 604_800_000);
        assert_eq!(parse_period("2w").unwrap().as_millis(), 1_209_600_000);
        assert_eq!(parse_period("1m").unwrap().as_millis(), 2_592_000_000);
        assert_eq!(parse_period("1y").unwrap().as_millis(), 31_536_000_000);
    }

    #[test]
    fn test_zero_period_is_empty_window() {
        assert_eq!(parse_period("0d").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_malformed_periods_rejected() {
        for raw in ["invalid", "7", "d7", "", "7x", "h", "-1d", "1.5d", "7dd"] {
            assert!(parse_period(raw).is_err(), "'{raw}' should be rejected");
        }
    }

    #[test]
    fn test_multi_digit_counts() {
        assert_eq!(parse_period("48h").unwrap().as_secs(), 48 * 3_600);
        assert_eq!(parse_period("365d").unwrap().as_secs(), 365 * 86_400);
    }
}
