//! Cell-level parsing and rendering shared by inference, coercion and the sinks.
//!
//! Everything here is a pure function of its input:
//! - [`is_null_token`] recognises the textual null sentinels found in exported files
//! - [`parse_number`] parses a finite number, keeping integers exact
//! - [`parse_timestamp`] parses the calendar formats the loader understands
//! - [`render_cell`] turns one typed Arrow cell back into text

use anyhow::{Result, bail};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Date32Type, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Tokens (compared case-insensitively, after trimming) that mean "no value".
const NULL_TOKENS: [&str; 8] = ["null", "none", "nan", "nat", "n/a", "na", "<na>", "#n/a"];

/// Upper bound (exclusive) of integral floats that still fit in an `i64`: 2^63.
const I64_BOUND_F64: f64 = 9_223_372_036_854_775_808.0;

const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Rendering format for DATETIME cells; the fraction is omitted when zero.
pub const DATETIME_RENDER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Rendering format for DATE cells.
pub const DATE_RENDER_FORMAT: &str = "%Y-%m-%d";

/// Whether `raw` is empty, whitespace-only, or one of the null sentinels
/// (`NULL`, `None`, `NaN`, `NaT`, `N/A`, `NA`, `<NA>`, `#N/A` in any case).
#[must_use]
pub fn is_null_token(raw: &str) -> bool {
    let s = raw.trim();
    s.is_empty() || NULL_TOKENS.iter().any(|t| s.eq_ignore_ascii_case(t))
}

/// A parsed numeric cell.
///
/// Integer literals stay exact (`i128`) so the int64 overflow guard is not
/// subject to float rounding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    /// Whether the value has a non-zero fractional part.
    #[must_use]
    pub fn has_fraction(self) -> bool {
        match self {
            Number::Int(_) => false,
            Number::Float(f) => f.fract() != 0.0,
        }
    }

    /// Whether the absolute value is greater than `i64::MAX`. This includes
    /// `i64::MIN`, whose magnitude is one past the bound.
    #[must_use]
    pub fn exceeds_i64(self) -> bool {
        match self {
            Number::Int(v) => v.unsigned_abs() > i64::MAX.unsigned_abs() as u128,
            Number::Float(f) => f.abs() >= I64_BOUND_F64,
        }
    }

    /// The value as an `i64`, if it is integral and in range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(v) => i64::try_from(v).ok(),
            Number::Float(f) if !self.has_fraction() && f.abs() < I64_BOUND_F64 => Some(f as i64),
            Number::Float(_) => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(f) => f,
        }
    }
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a numeric cell. Surrounding whitespace is ignored; infinities and
/// `NaN` are rejected.
#[must_use]
pub fn parse_number(raw: &str) -> Option<Number> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if is_integer_literal(s)
        && let Ok(v) = s.parse::<i128>()
    {
        return Some(Number::Int(v));
    }
    let f: f64 = s.parse().ok()?;
    f.is_finite().then_some(Number::Float(f))
}

/// Parse a calendar timestamp.
///
/// Accepts ISO-8601 dates and date-times (space or `T` separator, optional
/// fractional seconds), RFC 3339 values with an offset (normalized to UTC),
/// and day-first `dd/mm/yyyy` forms. A bare date parses at midnight.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.len() < 8 || !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Whether the timestamp's time-of-day is exactly midnight.
#[must_use]
pub fn is_midnight(ts: &NaiveDateTime) -> bool {
    ts.time() == NaiveTime::MIN
}

/// Render cell `row` of `array` as text, `None` for null.
///
/// # Errors
/// Returns an error for column types the loader never produces.
pub fn render_cell(array: &dyn Array, row: usize) -> Result<Option<String>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let text = match array.data_type() {
        DataType::Utf8 => array.as_string::<i32>().value(row).to_string(),
        DataType::Int64 => array.as_primitive::<Int64Type>().value(row).to_string(),
        DataType::Float64 => array.as_primitive::<Float64Type>().value(row).to_string(),
        DataType::Date32 => match array.as_primitive::<Date32Type>().value_as_date(row) {
            Some(d) => d.format(DATE_RENDER_FORMAT).to_string(),
            None => bail!("DATE value out of range at row {row}"),
        },
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            match array.as_primitive::<TimestampMicrosecondType>().value_as_datetime(row) {
                Some(ts) => ts.format(DATETIME_RENDER_FORMAT).to_string(),
                None => bail!("DATETIME value out of range at row {row}"),
            }
        }
        other => bail!("unsupported column type {other}"),
    };
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tokens_are_case_insensitive() {
        for t in ["", "  ", "NULL", "null", "Null", "NaN", "nan", "None", "NaT", "n/a", "<NA>"] {
            assert!(is_null_token(t), "{t:?} should be null");
        }
        for t in ["0", "nullable", "N", "-"] {
            assert!(!is_null_token(t), "{t:?} should not be null");
        }
    }

    #[test]
    fn numbers_keep_integers_exact() {
        assert_eq!(parse_number("9223372036854775807"), Some(Number::Int(i128::from(i64::MAX))));
        assert!(!parse_number("9223372036854775807").unwrap().exceeds_i64());
        assert!(parse_number("9223372036854775808").unwrap().exceeds_i64());
        assert!(parse_number("-9223372036854775808").unwrap().exceeds_i64());
        assert!(parse_number("2.5").unwrap().has_fraction());
        assert!(!parse_number("2.0").unwrap().has_fraction());
        assert_eq!(parse_number("2.0").unwrap().as_i64(), Some(2));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("12a"), None);
    }

    #[test]
    fn timestamps_in_supported_formats() {
        let midnight = parse_timestamp("2024-03-01").unwrap();
        assert!(is_midnight(&midnight));
        let ts = parse_timestamp("2024-03-01 10:15:00").unwrap();
        assert!(!is_midnight(&ts));
        assert_eq!(parse_timestamp("2024-03-01T10:15:00.250"), Some(ts + chrono::TimeDelta::milliseconds(250)));
        assert_eq!(parse_timestamp("01/03/2024"), Some(midnight));
        assert_eq!(parse_timestamp("2024-03-01T13:15:00+03:00"), Some(ts));
        assert_eq!(parse_timestamp("hello world"), None);
        assert_eq!(parse_timestamp("2024-13-01"), None);
    }
}
