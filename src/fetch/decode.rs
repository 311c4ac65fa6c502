//! Field helpers shared by the vendor payload decoders.
//!
//! Both vendors encode numbers as strings, and Kiwoom prefixes prices with a
//! direction sign (`+70100` / `-69800`) that carries no magnitude meaning.

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::utils::parse_compact_date;
use crate::vendors::Vendor;

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Absolute integer value of a possibly signed, possibly comma-grouped field.
pub fn parse_unsigned_amount(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n.abs());
    }
    let text = value_to_string(value);
    let digits = text.trim_start_matches(['+', '-']).replace(',', "");
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok()
}

pub fn optional_text(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .map(value_to_string)
        .filter(|text| !text.is_empty())
}

pub fn required_text(vendor: Vendor, row: &Value, key: &str) -> Result<String> {
    optional_text(row, key)
        .ok_or_else(|| AppError::data_format(vendor, format!("missing field `{key}`")))
}

pub fn required_amount(vendor: Vendor, row: &Value, key: &str) -> Result<i64> {
    let raw = row
        .get(key)
        .ok_or_else(|| AppError::data_format(vendor, format!("missing field `{key}`")))?;
    parse_unsigned_amount(raw).ok_or_else(|| {
        AppError::data_format(
            vendor,
            format!("field `{key}` is not numeric: {}", value_to_string(raw)),
        )
    })
}

pub fn required_date(vendor: Vendor, row: &Value, key: &str) -> Result<NaiveDate> {
    let text = required_text(vendor, row, key)?;
    parse_compact_date(&text)
        .map_err(|_| AppError::data_format(vendor, format!("field `{key}` is not a date: {text}")))
}

pub fn required_array<'a>(vendor: Vendor, body: &'a Value, key: &str) -> Result<&'a [Value]> {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| AppError::data_format(vendor, format!("response has no `{key}` array")))
}
