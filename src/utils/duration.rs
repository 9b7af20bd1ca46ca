//! Human readable durations such as `1m30s` or `50ms`. Every duration that ends up on disk or on
//! the wire goes through here so the ledger stays diffable.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,
    #[error("negative durations are not supported: '{0}'")]
    Negative(String),
    #[error("invalid duration '{0}'")]
    Invalid(String),
    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
    #[error("duration '{0}' is too large")]
    Overflow(String),
    #[error("duration '{0}' must be greater than zero")]
    Zero(String),
}

/// Formats a duration the way `parse_duration` reads it back, e.g. `1h2m3s`, `1.5s`, `250ms`.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".into();
    }

    if nanos < NANOS_PER_MICRO {
        return format!("{nanos}ns");
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}µs", with_fraction(nanos, NANOS_PER_MICRO));
    }
    if nanos < NANOS_PER_SECOND {
        return format!("{}ms", with_fraction(nanos, NANOS_PER_MILLI));
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MINUTE;
    let seconds = with_fraction(nanos % NANOS_PER_MINUTE, NANOS_PER_SECOND);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn with_fraction(nanos: u128, unit: u128) -> String {
    let whole = nanos / unit;
    let fraction = nanos % unit;
    if fraction == 0 {
        return whole.to_string();
    }

    let digits = unit.ilog10() as usize;
    let fraction = format!("{fraction:0digits$}");
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Parses a sequence of `<number><unit>` pairs such as `1h30m`, `1.5s` or `50ms`.
/// A bare `0` is accepted as zero.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseDurationError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(ParseDurationError::Negative(input.into()));
    }
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(ParseDurationError::Invalid(input.into()));
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(ParseDurationError::MissingUnit(input.into()));
        }

        let scale = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            _ => {
                return Err(ParseDurationError::UnknownUnit {
                    unit: unit.into(),
                    input: input.into(),
                });
            }
        };

        total = total
            .checked_add(scaled(number, scale, input)?)
            .ok_or_else(|| ParseDurationError::Overflow(input.into()))?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SECOND)
        .map_err(|_| ParseDurationError::Overflow(input.into()))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SECOND) as u32))
}

/// Same as [parse_duration] but refuses zero, for intervals that drive a loop.
pub fn parse_positive_duration(input: &str) -> Result<Duration, ParseDurationError> {
    match parse_duration(input)? {
        duration if duration.is_zero() => Err(ParseDurationError::Zero(input.into())),
        duration => Ok(duration),
    }
}

fn scaled(number: &str, scale: u128, input: &str) -> Result<u128, ParseDurationError> {
    let invalid = || ParseDurationError::Invalid(input.into());
    let overflow = || ParseDurationError::Overflow(input.into());

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) if !fraction.contains('.') => (whole, fraction),
        Some(_) => return Err(invalid()),
        None => (number, ""),
    };

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut value = whole.checked_mul(scale).ok_or_else(overflow)?;

    // Digits beyond nanosecond precision are dropped.
    let mut divisor = 1u128;
    let mut fraction_value = 0u128;
    for digit in fraction.chars().take(18) {
        let digit = digit.to_digit(10).ok_or_else(invalid)? as u128;
        fraction_value = fraction_value * 10 + digit;
        divisor *= 10;
    }
    value += fraction_value * scale / divisor;
    Ok(value)
}

/// `#[serde(with = "serde_human")]` support for [Duration] fields.
pub mod serde_human {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(D::Error::custom)
    }
}
