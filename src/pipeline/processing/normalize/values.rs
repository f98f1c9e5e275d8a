//! Typed coercion of raw cell values.
//!
//! CSV cells arrive as strings, NDJSON cells may already be numbers. Every
//! helper accepts both and reports failures as a message for the caller to
//! wrap into a `ValidationError`.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;

use crate::pipeline::storage::Row;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?$").expect("valid number pattern")
    })
}

/// Trimmed, non-empty text of a cell. Numbers and booleans are rendered.
pub fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Whether the cell is absent, null or blank.
pub fn is_blank(row: &Row, column: &str) -> bool {
    text(row, column).is_none()
}

/// Parse a numeric cell. Missing, blank and the `-` placeholder mean zero.
pub fn parse_number(value: Option<&Value>) -> Result<f64, String> {
    let number = match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("unrepresentable number {}", n)),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s == "-" {
                return Ok(0.0);
            }
            if !number_pattern().is_match(s) {
                return Err(format!("not a number: {:?}", s));
            }
            s.replace(',', "")
                .parse::<f64>()
                .map_err(|e| format!("not a number: {:?} ({})", s, e))
        }
        Some(other) => Err(format!("not a number: {}", other)),
    }?;
    if !number.is_finite() {
        return Err(format!("number out of range: {}", number));
    }
    Ok(number)
}

/// Parse an integral cell; fractional values are rejected.
pub fn parse_integer(value: Option<&Value>) -> Result<i64, String> {
    if let Some(Value::Number(n)) = value {
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
    }
    let number = parse_number(value)?;
    if number.fract() != 0.0 || !number.is_finite() || number.abs() > i64::MAX as f64 {
        return Err(format!("not an integer: {}", number));
    }
    Ok(number as i64)
}

/// Parse a date cell. Blank cells are `None`.
pub fn parse_date(value: Option<&Value>) -> Result<Option<NaiveDate>, String> {
    let s = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim(),
        Some(other) => return Err(format!("not a date: {}", other)),
    };
    if s.is_empty() {
        return Ok(None);
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Ok(Some(date));
        }
    }
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map(|dt| Some(dt.date()))
        .map_err(|_| format!("not a date: {:?}", s))
}

/// Calendar quarter (1-4) of a month (1-12).
pub fn quarter_of_month(month: u32) -> i64 {
    ((month as i64 - 1) / 3) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    #[test]
    fn test_parse_number_formats() {
        assert_eq!(parse_number(Some(&json!("1,234.50"))).unwrap(), 1234.5);
        assert_eq!(parse_number(Some(&json!(" 42 "))).unwrap(), 42.0);
        assert_eq!(parse_number(Some(&json!("-3.5"))).unwrap(), -3.5);
        assert_eq!(parse_number(Some(&json!(7))).unwrap(), 7.0);
        assert_eq!(parse_number(Some(&json!("-"))).unwrap(), 0.0);
        assert_eq!(parse_number(Some(&json!(""))).unwrap(), 0.0);
        assert_eq!(parse_number(None).unwrap(), 0.0);
    }

    #[test]
    fn test_parse_number_rejects_garbage() {
        assert!(parse_number(Some(&json!("12abc"))).is_err());
        assert!(parse_number(Some(&json!("1,23"))).is_err());
        assert!(parse_number(Some(&json!("N/A"))).is_err());
        assert!(parse_number(Some(&json!(true))).is_err());
    }

    #[test]
    fn test_parse_number_rejects_overflow() {
        let huge = "9".repeat(400);
        assert!(parse_number(Some(&json!(huge))).is_err());
        assert!(parse_number(Some(&json!(format!("-{}.5", huge)))).is_err());
        assert!(parse_integer(Some(&json!(huge))).is_err());
    }

    #[test]
    fn test_parse_integer_rejects_fractions() {
        assert_eq!(parse_integer(Some(&json!("2,023"))).unwrap(), 2023);
        assert_eq!(parse_integer(Some(&json!("12.0"))).unwrap(), 12);
        assert!(parse_integer(Some(&json!("12.5"))).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let d = parse_date(Some(&json!("2023-07-14"))).unwrap().unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2023, 7, 14));
        let d = parse_date(Some(&json!("07/14/2023"))).unwrap().unwrap();
        assert_eq!(d.month(), 7);
        let d = parse_date(Some(&json!("2023-07-14 08:30:00"))).unwrap().unwrap();
        assert_eq!(d.day(), 14);
        assert_eq!(parse_date(Some(&json!(""))).unwrap(), None);
        assert!(parse_date(Some(&json!("14 July"))).is_err());
    }

    #[test]
    fn test_quarter_of_month() {
        assert_eq!(quarter_of_month(1), 1);
        assert_eq!(quarter_of_month(3), 1);
        assert_eq!(quarter_of_month(4), 2);
        assert_eq!(quarter_of_month(12), 4);
    }

    #[test]
    fn test_text_trims_and_renders_numbers() {
        let row = json!({"a": "  x ", "b": "   ", "c": 5, "d": null})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(text(&row, "a").as_deref(), Some("x"));
        assert_eq!(text(&row, "b"), None);
        assert_eq!(text(&row, "c").as_deref(), Some("5"));
        assert!(is_blank(&row, "d"));
        assert!(is_blank(&row, "missing"));
    }
}
