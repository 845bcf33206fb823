// src/reshape/coerce.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::table::Value;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Parse the date part of a timestamp-like string. Unknown shapes yield `None`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        })
}

/// Normalise a cell to a `YYYY-MM-DD` string. `None` means the value could
/// not be read as a date; callers store NULL.
pub fn to_date_string(v: &Value) -> Option<Value> {
    match v {
        Value::Text(s) => parse_date(s).map(|d| Value::Text(d.format("%Y-%m-%d").to_string())),
        _ => None,
    }
}

/// Normalise a cell to an integer, truncating fractional values.
pub fn to_integer(v: &Value) -> Option<Value> {
    match v {
        Value::Integer(i) => Some(Value::Integer(*i)),
        Value::Real(f) if f.is_finite() => Some(Value::Integer(f.trunc() as i64)),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.replace(',', ".")
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(Value::Integer)
        }
        _ => None,
    }
}
