//! SQLite helper utilities for type conversion
//!
//! SQLite has no native arrays, booleans or dates. Lists are stored as JSON
//! text, flags as 0/1 integers and dates as ISO 8601 text.

use chrono::{NaiveDate, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// Serialize a Vec to a JSON string for SQLite storage
#[inline]
pub fn vec_to_json<T: Serialize>(v: &[T]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize a JSON string from SQLite to a Vec
#[inline]
pub fn json_to_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Get current UTC timestamp as ISO8601 string for SQLite
#[inline]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

#[inline]
pub fn date_to_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse an optional `YYYY-MM-DD` string; unparseable values become None
#[inline]
pub fn str_to_date_opt(s: Option<&str>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Convert bool to SQLite integer (0 or 1)
#[inline]
pub fn bool_to_int(b: bool) -> i32 {
    if b { 1 } else { 0 }
}

/// Convert SQLite integer to bool
#[inline]
pub fn int_to_bool(i: i32) -> bool {
    i != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vec() {
        let v: Vec<String> = vec![];
        let json = vec_to_json(&v);
        assert_eq!(json, "[]");
        let parsed: Vec<String> = json_to_vec(&json);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_bad_date_is_none() {
        assert_eq!(str_to_date_opt(Some("not a date")), None);
        assert_eq!(str_to_date_opt(None), None);
        assert_eq!(
            str_to_date_opt(Some("2023-12-31")),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(bool_to_int(true), 1);
        assert_eq!(bool_to_int(false), 0);
        assert!(int_to_bool(42));
        assert!(!int_to_bool(0));
    }
}
