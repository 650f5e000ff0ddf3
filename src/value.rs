//! Value extraction and numeric coercion.
//!
//! Coercion is best effort: a malformed numeric literal becomes `0`, with no diagnostic, for
//! every magnitude-bearing kind (count, gauge, histogram, distribution). Only a value field
//! holding a non-string value is reported, as a warning.
use tracing::warn;

use crate::config::MetricSpec;
use crate::record::Record;

/// Returns the raw text of the configured value field, or an empty string when there is no
/// value field, the field is absent, or it does not hold a string.
pub fn extract_value(spec: &MetricSpec, record: &Record) -> String {
    let Some(field) = spec.value_field() else {
        return String::new();
    };
    let Some(value) = record.get(field) else {
        return String::new();
    };
    match value.as_text() {
        Some(text) => text.into_owned(),
        None => {
            warn!(
                field,
                value_type = value.type_name(),
                "value field is not a string"
            );
            String::new()
        }
    }
}

/// Integer magnitude of `raw`, or `0` if it is not an integer literal.
pub fn coerce_int(raw: &str) -> i64 {
    parse_int_literal(raw).unwrap_or(0)
}

/// Float magnitude of `raw`, or `0.0` if it is not a float literal.
pub fn coerce_float(raw: &str) -> f64 {
    raw.parse::<f64>().unwrap_or(0.0)
}

/// Parses an integer literal whose base is given by its prefix: `0x` hexadecimal, `0b`
/// binary, `0o` or a bare leading `0` octal, decimal otherwise. A leading sign and `_`
/// separators between digits, or between the base prefix and the first digit, are accepted.
pub(crate) fn parse_int_literal(raw: &str) -> Option<i64> {
    let (negative, unsigned) = match *raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    let lower = unsigned.get(..2).map(str::to_ascii_lowercase);
    let (radix, digits, prefixed) = match lower.as_deref() {
        Some("0x") => (16, &unsigned[2..], true),
        Some("0b") => (2, &unsigned[2..], true),
        Some("0o") => (8, &unsigned[2..], true),
        _ if unsigned.len() > 1 && unsigned.starts_with('0') => (8, &unsigned[1..], true),
        _ => (10, unsigned, false),
    };

    if digits.is_empty() || !valid_underscores(digits, prefixed) {
        return None;
    }
    // from_str_radix would accept a second sign after the prefix
    if !digits.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_') {
        return None;
    }

    let mut cleaned = String::with_capacity(digits.len() + 1);
    if negative {
        cleaned.push('-');
    }
    cleaned.extend(digits.chars().filter(|&c| c != '_'));
    i64::from_str_radix(&cleaned, radix).ok()
}

fn valid_underscores(digits: &str, prefixed: bool) -> bool {
    (prefixed || !digits.starts_with('_')) && !digits.ends_with('_') && !digits.contains("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{CapturedLogs, LogLevel};

    fn gauge_spec() -> MetricSpec {
        MetricSpec::parse(&[
            ("metric_type", "gauge"),
            ("metric_name", "load"),
            ("value_field", "v"),
        ])
        .unwrap()
    }

    #[test]
    fn test_extract_value() {
        let spec = gauge_spec();
        let record: Record = [("v", "3.5")].into_iter().collect();
        assert_eq!(extract_value(&spec, &record), "3.5");

        let record: Record = [("other", "3.5")].into_iter().collect();
        assert_eq!(extract_value(&spec, &record), "");
    }

    #[test]
    fn test_extract_value_without_field() {
        let spec = MetricSpec::parse(&[("metric_type", "set"), ("metric_name", "sessions")])
            .unwrap();
        let record: Record = [("v", "session-42")].into_iter().collect();
        assert_eq!(extract_value(&spec, &record), "");
    }

    #[test]
    fn test_non_string_value_warns() {
        let logs = CapturedLogs::default();
        let logger = logs.logger(LogLevel::Warn);
        let spec = gauge_spec();
        let mut record = Record::new();
        record.insert("v", 3.5);

        let raw = logger.in_scope(|| extract_value(&spec, &record));
        assert_eq!(raw, "");
        let out = logs.contents();
        assert!(out.contains("value field is not a string"));
        assert!(out.contains("field=\"v\""));
    }

    #[test]
    fn test_parse_int_literal() {
        assert_eq!(parse_int_literal("42"), Some(42));
        assert_eq!(parse_int_literal("-42"), Some(-42));
        assert_eq!(parse_int_literal("+7"), Some(7));
        assert_eq!(parse_int_literal("0"), Some(0));
        assert_eq!(parse_int_literal("0x1F"), Some(31));
        assert_eq!(parse_int_literal("0XfF"), Some(255));
        assert_eq!(parse_int_literal("-0x10"), Some(-16));
        assert_eq!(parse_int_literal("0b101"), Some(5));
        assert_eq!(parse_int_literal("0o17"), Some(15));
        assert_eq!(parse_int_literal("017"), Some(15));
        assert_eq!(parse_int_literal("1_000_000"), Some(1_000_000));
        assert_eq!(parse_int_literal("0x_1F"), Some(31));
        assert_eq!(parse_int_literal("0_17"), Some(15));
        assert_eq!(parse_int_literal("-0b_1_0"), Some(-2));
        assert_eq!(
            parse_int_literal("-9223372036854775808"),
            Some(i64::MIN)
        );

        for bad in [
            "", "-", "abc", "0x", "0x_", "0x__1", "0_", "0x-1", "08", "1.5", "_1", "1_", "1__0", " 1",
            "9223372036854775808",
        ] {
            assert_eq!(parse_int_literal(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn test_failed_coercion_is_zero() {
        assert_eq!(coerce_int("abc"), 0);
        assert_eq!(coerce_int(""), 0);
        assert_eq!(coerce_int("0x2A"), 42);
        assert_eq!(coerce_int("0x_2A"), 42);
        assert_eq!(coerce_float("3.5"), 3.5);
        assert_eq!(coerce_float("-1e3"), -1000.0);
        assert_eq!(coerce_float("three"), 0.0);
        assert_eq!(coerce_float(""), 0.0);
    }
}
