//! # Durations
//!
//! Parses Kubernetes/Go style duration strings such as `10m`, `1h30m` or
//! `500ms`, as used by `spec.interval`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration format {0:?}, expected e.g. '30s', '10m' or '1h30m'")]
    InvalidFormat(String),
    #[error("duration {0:?} must be greater than zero")]
    Zero(String),
    #[error("duration {0:?} is out of range")]
    Overflow(String),
}

static SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?P<number>\d+)(?P<unit>ms|s|m|h|d)").ok());

fn unit_millis(unit: &str) -> u64 {
    match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => 86_400_000,
    }
}

/// Parse a duration made of one or more `<number><unit>` segments
///
/// Units: `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let segment = SEGMENT
        .as_ref()
        .ok_or_else(|| DurationError::InvalidFormat(trimmed.to_string()))?;

    let mut consumed = 0;
    let mut total_millis: u64 = 0;
    for captures in segment.captures_iter(trimmed) {
        let (Some(whole), Some(number), Some(unit)) =
            (captures.get(0), captures.name("number"), captures.name("unit"))
        else {
            return Err(DurationError::InvalidFormat(trimmed.to_string()));
        };
        if whole.start() != consumed {
            return Err(DurationError::InvalidFormat(trimmed.to_string()));
        }
        consumed = whole.end();

        let number: u64 = number
            .as_str()
            .parse()
            .map_err(|_| DurationError::Overflow(trimmed.to_string()))?;
        total_millis = number
            .checked_mul(unit_millis(unit.as_str()))
            .and_then(|millis| total_millis.checked_add(millis))
            .ok_or_else(|| DurationError::Overflow(trimmed.to_string()))?;
    }
    if consumed != trimmed.len() {
        return Err(DurationError::InvalidFormat(trimmed.to_string()));
    }
    if total_millis == 0 {
        return Err(DurationError::Zero(trimmed.to_string()));
    }
    Ok(Duration::from_millis(total_millis))
}
