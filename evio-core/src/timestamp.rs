//! Timestamp and timecode conversions.
//!
//! Every component of this crate computes with integer microseconds.
//! Timecodes (`HH:MM:SS.ffffff` strings) and floating-point seconds exist
//! only at the API boundary, for input convenience and display.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while converting timestamps.
#[derive(Error, Debug)]
pub enum TimecodeError {
    #[error("parsing the timecode \"{0}\" failed")]
    Unparseable(String),

    #[error("negative timestamps are not supported (got {0})")]
    Negative(f64),
}

/// A number of seconds encoded as an integer, a float, or a timecode.
///
/// A timecode is a string in the form `hh:mm:ss.ffffff` where `hh` are
/// hours, `mm` minutes, `ss` seconds and `ffffff` microseconds. Hours,
/// minutes, and the fractional part are optional.
#[derive(Debug, Clone, PartialEq)]
pub enum Time {
    /// Whole seconds
    Seconds(u64),
    /// Fractional seconds, rounded to the nearest microsecond
    SecondsF(f64),
    /// Timecode string (`H:MM:SS[.ffffff]`, `M:SS[.ffffff]`, or `S[.ffffff]`)
    Timecode(String),
}

impl From<u64> for Time {
    fn from(value: u64) -> Self {
        Time::Seconds(value)
    }
}

impl From<f64> for Time {
    fn from(value: f64) -> Self {
        Time::SecondsF(value)
    }
}

impl From<&str> for Time {
    fn from(value: &str) -> Self {
        Time::Timecode(value.to_owned())
    }
}

impl From<String> for Time {
    fn from(value: String) -> Self {
        Time::Timecode(value)
    }
}

fn full_timecode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})(\.\d{0,6})?$").expect("valid regex"))
}

fn minutes_timecode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+):(\d{2})(\.\d{0,6})?$").expect("valid regex"))
}

fn seconds_timecode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)(\.\d{0,6})?$").expect("valid regex"))
}

/// Parses the fractional part of a timecode (including the leading dot),
/// right-padded to microsecond precision.
fn fraction_to_microseconds(fraction: &str) -> u64 {
    let digits = &fraction[1..];
    let mut result = digits.parse::<u64>().unwrap_or(0);
    for _ in digits.len()..6 {
        result *= 10;
    }
    result
}

fn capture_to_u64(capture: Option<regex::Match<'_>>) -> u64 {
    capture
        .map(|value| value.as_str().parse::<u64>().unwrap_or(0))
        .unwrap_or(0)
}

/// Converts a timestamp (timecode or seconds) to an integer number of
/// microseconds.
pub fn parse_timestamp(time: impl Into<Time>) -> Result<u64, TimecodeError> {
    match time.into() {
        Time::Seconds(value) => Ok(value * 1_000_000),
        Time::SecondsF(value) => {
            if value < 0.0 {
                return Err(TimecodeError::Negative(value));
            }
            Ok((value * 1e6).round() as u64)
        }
        Time::Timecode(value) => {
            if let Some(captures) = full_timecode_pattern().captures(&value) {
                let mut result = capture_to_u64(captures.get(1)) * (1_000_000 * 60 * 60)
                    + capture_to_u64(captures.get(2)) * (1_000_000 * 60)
                    + capture_to_u64(captures.get(3)) * 1_000_000;
                if let Some(fraction) = captures.get(4) {
                    result += fraction_to_microseconds(fraction.as_str());
                }
                return Ok(result);
            }
            if let Some(captures) = minutes_timecode_pattern().captures(&value) {
                let mut result = capture_to_u64(captures.get(1)) * (1_000_000 * 60)
                    + capture_to_u64(captures.get(2)) * 1_000_000;
                if let Some(fraction) = captures.get(3) {
                    result += fraction_to_microseconds(fraction.as_str());
                }
                return Ok(result);
            }
            if let Some(captures) = seconds_timecode_pattern().captures(&value) {
                let mut result = capture_to_u64(captures.get(1)) * 1_000_000;
                if let Some(fraction) = captures.get(2) {
                    result += fraction_to_microseconds(fraction.as_str());
                }
                return Ok(result);
            }
            Err(TimecodeError::Unparseable(value))
        }
    }
}

/// Formats a microsecond timestamp as a zero-padded `HH:MM:SS.ffffff`
/// timecode.
pub fn timestamp_to_timecode(value: u64) -> String {
    let mut value = value;
    let hours = value / (1_000_000 * 60 * 60);
    value -= hours * (1_000_000 * 60 * 60);
    let minutes = value / (1_000_000 * 60);
    value -= minutes * (1_000_000 * 60);
    let seconds = value / 1_000_000;
    value -= seconds * 1_000_000;
    format!("{:02}:{:02}:{:02}.{:06}", hours, minutes, seconds, value)
}

/// Converts a microsecond timestamp to floating-point seconds.
///
/// For display only, never for comparisons.
pub fn timestamp_to_seconds(value: u64) -> f64 {
    value as f64 * 1e-6
}
