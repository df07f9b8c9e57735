//! Lenient coercion of raw JSON values to refined column types
//!
//! Missing and `null` inputs become [`Cell::Null`] without complaint. Any
//! other value that cannot be represented in the target type is an error
//! the caller turns into a null and a counted cast failure.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::schema::FieldType;

/// Days from 0001-01-01 to 1970-01-01
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// One typed value of a refined column
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Microseconds since the Unix epoch, UTC
    Timestamp(i64),
    /// Days since the Unix epoch
    Date(i32),
    /// Unscaled value; the scale lives in the column type
    Decimal(i128),
}

/// Hashable form of a non-null cell, used for natural keys
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Float(u64),
    Bool(bool),
    Timestamp(i64),
    Date(i32),
    Decimal(i128),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn key_part(&self) -> Option<KeyPart> {
        Some(match self {
            Cell::Null => return None,
            Cell::Str(v) => KeyPart::Str(v.clone()),
            Cell::Int(v) => KeyPart::Int(*v),
            Cell::Float(v) => KeyPart::Float(v.to_bits()),
            Cell::Bool(v) => KeyPart::Bool(*v),
            Cell::Timestamp(v) => KeyPart::Timestamp(*v),
            Cell::Date(v) => KeyPart::Date(*v),
            Cell::Decimal(v) => KeyPart::Decimal(*v),
        })
    }
}

pub type CastResult = std::result::Result<Cell, String>;

pub fn cast(value: Option<&Value>, ty: FieldType) -> CastResult {
    let value = match value {
        None | Some(Value::Null) => return Ok(Cell::Null),
        Some(v) => v,
    };

    match ty {
        FieldType::String => Ok(Cell::Str(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        })),
        FieldType::Int => to_int(value).map(Cell::Int),
        FieldType::Float => to_float(value).map(Cell::Float),
        FieldType::Bool => to_bool(value).map(Cell::Bool),
        FieldType::Timestamp => to_timestamp(value).map(Cell::Timestamp),
        FieldType::Date => to_date(value).map(Cell::Date),
        FieldType::Decimal { precision, scale } => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                other => return Err(format!("cannot cast {other} to decimal")),
            };
            parse_decimal(&text, precision, scale).map(Cell::Decimal)
        }
    }
}

fn to_int(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                n.as_f64()
                    .and_then(integral_f64)
                    .ok_or_else(|| format!("{n} is not an integer"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
                .ok_or_else(|| format!("'{s}' is not an integer"))
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("cannot cast {other} to int")),
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_float(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{n} is not a float")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{s}' is not a number")),
        other => Err(format!("cannot cast {other} to float")),
    }
}

fn to_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{n} is not a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        other => Err(format!("cannot cast {other} to bool")),
    }
}

/// Numbers are seconds since the epoch; strings are RFC 3339, a naive
/// date-time taken as UTC, or digits of epoch seconds
fn to_timestamp(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                secs.checked_mul(1_000_000)
                    .ok_or_else(|| format!("{n} is out of range for a timestamp"))
            } else {
                let secs = n.as_f64().ok_or_else(|| format!("{n} is not a timestamp"))?;
                let micros = (secs * 1_000_000.0).round();
                if micros.is_finite() && micros.abs() < i64::MAX as f64 {
                    Ok(micros as i64)
                } else {
                    Err(format!("{n} is out of range for a timestamp"))
                }
            }
        }
        Value::String(s) => parse_timestamp(s.trim()).ok_or_else(|| format!("'{s}' is not a timestamp")),
        other => Err(format!("cannot cast {other} to timestamp")),
    }
}

fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.timestamp_micros());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_micros());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_micros());
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok()?.checked_mul(1_000_000);
    }
    None
}

fn to_date(value: &Value) -> std::result::Result<i32, String> {
    let Value::String(s) = value else {
        return Err(format!("cannot cast {value} to date"));
    };
    let s = s.trim();
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.date_naive()))
        .ok_or_else(|| format!("'{s}' is not a date"))?;
    Ok(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
}

/// Parse a plain decimal literal into an unscaled integer at `scale`,
/// rounding half away from zero. Exponent notation is rejected.
pub fn parse_decimal(text: &str, precision: u8, scale: i8) -> std::result::Result<i128, String> {
    let invalid = || format!("'{text}' is not a decimal");
    let scale = usize::try_from(scale).map_err(|_| invalid())?;

    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let int_part = int_part.trim_start_matches('0');
    let int_digits = int_part.len();
    if int_digits + scale > usize::from(precision) {
        return Err(format!("'{text}' does not fit decimal({precision},{scale})"));
    }

    let mut unscaled: i128 = 0;
    for b in int_part.bytes() {
        unscaled = unscaled * 10 + i128::from(b - b'0');
    }
    let mut frac = frac_part.bytes();
    for _ in 0..scale {
        let digit = frac.next().map_or(0, |b| b - b'0');
        unscaled = unscaled * 10 + i128::from(digit);
    }
    if frac.next().is_some_and(|b| b >= b'5') {
        unscaled += 1;
        if unscaled >= 10i128.pow(u32::from(precision)) {
            return Err(format!("'{text}' does not fit decimal({precision},{scale})"));
        }
    }

    Ok(if negative { -unscaled } else { unscaled })
}
