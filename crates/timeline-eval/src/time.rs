//! Time values: parsing `[[H:]MM:]SS[.mmm]` strings and formatting milliseconds.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::TimelineEvalError;

/// A time value as written in a project document.
///
/// Numbers are milliseconds; strings use clock notation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Millis(f64),
    Text(String),
}

impl From<f64> for TimeValue {
    fn from(ms: f64) -> Self {
        Self::Millis(ms)
    }
}

impl From<&str> for TimeValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Resolve a [`TimeValue`] to milliseconds.
pub fn parse_time(value: &TimeValue) -> Result<f64, TimelineEvalError> {
    match value {
        TimeValue::Millis(ms) if ms.is_finite() => Ok(*ms),
        TimeValue::Millis(ms) => Err(TimelineEvalError::InvalidTime {
            value: ms.to_string(),
            reason: "not a finite number".into(),
        }),
        TimeValue::Text(text) => parse_time_str(text),
    }
}

/// Parse clock notation: the last segment is seconds, the ones before it
/// minutes and hours. `"1:02.5"` is 62500 ms.
pub fn parse_time_str(text: &str) -> Result<f64, TimelineEvalError> {
    let invalid = |reason: &str| TimelineEvalError::InvalidTime {
        value: text.to_owned(),
        reason: reason.to_owned(),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty time string"));
    }

    let segments: Vec<&str> = trimmed.split(':').collect();
    if segments.len() > 3 {
        return Err(invalid("expected at most hours:minutes:seconds"));
    }

    let mut total = 0.0;
    for (i, segment) in segments.iter().rev().enumerate() {
        let part: f64 = segment
            .trim()
            .parse()
            .map_err(|_| invalid("segment is not a number"))?;
        if !part.is_finite() {
            return Err(invalid("segment is not finite"));
        }
        total += part * 60f64.powi(i as i32) * 1000.0;
    }
    Ok(total)
}

/// Options for [`format_time`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatTimeOptions {
    /// Always print minutes, padded to two digits.
    pub force_minutes: bool,
    /// Pad seconds to two digits even without a minutes field.
    pub force_seconds: bool,
    /// Fixed number of fractional digits (truncated or zero-padded).
    /// `None` prints the shortest fraction and omits a zero one.
    pub milli_decimal_places: Option<usize>,
}

/// Format milliseconds as clock notation. Inverse of [`parse_time_str`].
pub fn format_time(ms: f64, options: &FormatTimeOptions) -> String {
    let ms = if ms.is_finite() { ms.max(0.0) } else { 0.0 };

    let hours = (ms / 3_600_000.0).floor() as u64;
    let minutes = ((ms / 60_000.0) % 60.0).floor() as u64;
    let seconds = ((ms / 1000.0) % 60.0).floor() as u64;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}:");
    }
    if minutes > 0 || !out.is_empty() || options.force_minutes {
        if !out.is_empty() || options.force_minutes {
            let _ = write!(out, "{minutes:02}:");
        } else {
            let _ = write!(out, "{minutes}:");
        }
    }
    if !out.is_empty() || options.force_seconds {
        let _ = write!(out, "{seconds:02}");
    } else {
        let _ = write!(out, "{seconds}");
    }

    let fraction = fraction_digits(ms);
    match options.milli_decimal_places {
        Some(0) => {}
        Some(places) => {
            let mut digits: String = fraction.chars().take(places).collect();
            while digits.len() < places {
                digits.push('0');
            }
            out.push('.');
            out.push_str(&digits);
        }
        None if !fraction.is_empty() => {
            out.push('.');
            out.push_str(&fraction);
        }
        None => {}
    }
    out
}

/// Digits after the decimal point of the sub-second part, shortest form.
fn fraction_digits(ms: f64) -> String {
    let fraction = (ms % 1000.0) / 1000.0;
    if fraction == 0.0 {
        return String::new();
    }
    let repr = fraction.to_string();
    repr.strip_prefix("0.").unwrap_or("").to_owned()
}
