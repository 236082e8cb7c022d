//! Polling interval parsing.
//!
//! Accepts duration strings made of `<number><unit>` segments, e.g. "30s",
//! "1m", "1h30m" or "1.5m". Units: ns, us (µs), ms, s, m, h.

use std::time::Duration;

use crate::error::ConfigError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Digits beyond this many fractional places are ignored.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a polling interval. Zero and negative intervals are rejected.
pub fn parse_polling_interval(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidInterval {
        value: value.to_string(),
        reason,
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(invalid("negative durations are not allowed".to_string()));
    }

    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid(format!("expected a number at {rest:?}")));
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        if unit_len == 0 {
            return Err(invalid(format!("missing unit after {number:?}")));
        }
        let (unit, next) = tail.split_at(unit_len);

        let scale =
            unit_nanos(unit).ok_or_else(|| invalid(format!("unknown unit {unit:?}")))?;
        let segment = segment_nanos(number, scale)
            .ok_or_else(|| invalid(format!("invalid number {number:?}")))?;
        total = total
            .checked_add(segment)
            .ok_or_else(|| invalid("duration overflows".to_string()))?;

        rest = next;
    }

    if total == 0 {
        return Err(invalid("interval must be positive".to_string()));
    }

    let nanos = u64::try_from(total).map_err(|_| invalid("duration overflows".to_string()))?;
    Ok(Duration::from_nanos(nanos))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

fn segment_nanos(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return None;
    }

    let whole_value: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole_value.checked_mul(scale)?;

    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().ok()?;
        let divisor = 10u128.checked_pow(fraction.len() as u32)?;
        nanos = nanos.checked_add(digits.checked_mul(scale)? / divisor)?;
    }

    Some(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_polling_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_polling_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_polling_interval("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_polling_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_polling_interval("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_polling_interval("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_polling_interval("5ns").unwrap(), Duration::from_nanos(5));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(
            parse_polling_interval("1h30m").unwrap(),
            Duration::from_secs(5_400)
        );
        assert_eq!(
            parse_polling_interval("1m30s").unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(parse_polling_interval("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_polling_interval(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_polling_interval("+45s").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for value in ["", "   ", "30", "s", "banana", "10x", "1..5s", "-30s", "0s", "0m0s", "."] {
            assert!(
                parse_polling_interval(value).is_err(),
                "expected {value:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_error_names_value() {
        let err = parse_polling_interval("every minute").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { ref value, .. } if value == "every minute"));
    }
}
