use chrono::DateTime;
use serde::Deserialize;

use crate::error::{Result, RunlensError};

/// A unix-nanosecond timestamp as senders actually encode it: a native
/// integer, a decimal string, or the two-word `{low, high}` composite that
/// 64-bit-averse JSON serializers produce. Unrecognized shapes canonicalize
/// to `"0"` rather than failing the span.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UnixNano {
    Uint(u64),
    Int(i64),
    Float(f64),
    Text(String),
    Words { low: i64, high: i64 },
    Other(serde_json::Value),
}

impl UnixNano {
    /// True when the value is the wire encoding's "not set" form: a zero
    /// integer or an empty string. Absent values are handled by the caller.
    pub fn is_unset(&self) -> bool {
        match self {
            UnixNano::Uint(0) | UnixNano::Int(0) => true,
            UnixNano::Float(f) => *f == 0.0,
            UnixNano::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            UnixNano::Uint(_) | UnixNano::Int(_) | UnixNano::Float(_) | UnixNano::Words { .. } => {
                true
            }
            UnixNano::Text(s) => s.trim().parse::<f64>().is_ok(),
            UnixNano::Other(_) => false,
        }
    }
}

/// Canonical decimal-string form of a wire timestamp. The `{low, high}`
/// composite decodes as `low + high * 2^32`.
pub fn decode_unix_nano(value: Option<&UnixNano>) -> String {
    match value {
        Some(UnixNano::Uint(v)) => v.to_string(),
        Some(UnixNano::Int(v)) => v.to_string(),
        Some(UnixNano::Float(v)) => v.to_string(),
        Some(UnixNano::Text(s)) => s.clone(),
        Some(UnixNano::Words { low, high }) => (low + high * 0x1_0000_0000).to_string(),
        Some(UnixNano::Other(_)) | None => "0".to_string(),
    }
}

/// Nanoseconds since the epoch for an RFC3339 timestamp, as a decimal
/// string. Only legacy rows store human-readable timestamps, so this is a
/// migration-only path; sub-millisecond precision is not preserved there.
pub fn encode_unix_nano(iso: &str) -> Result<String> {
    let ts = DateTime::parse_from_rfc3339(iso)
        .map_err(|e| RunlensError::Parse(format!("invalid RFC3339 timestamp {iso:?}: {e}")))?;
    Ok((ts.timestamp_millis() * 1_000_000).to_string())
}

/// Signed latency between two canonical decimal-nanosecond strings. Inverted
/// timestamps yield a negative value by design; unparseable input counts as
/// zero. Integral strings subtract exactly since nanosecond epochs exceed
/// the f64 mantissa.
pub fn latency_ns(start: &str, end: &str) -> i64 {
    match (start.trim().parse::<i128>(), end.trim().parse::<i128>()) {
        (Ok(start), Ok(end)) => (end - start) as i64,
        _ => {
            let start = start.trim().parse::<f64>().unwrap_or(0.0);
            let end = end.trim().parse::<f64>().unwrap_or(0.0);
            (end - start) as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_native_and_string_forms() {
        assert_eq!(
            decode_unix_nano(Some(&UnixNano::Uint(1_700_000_000_000_000_000))),
            "1700000000000000000"
        );
        assert_eq!(
            decode_unix_nano(Some(&UnixNano::Text("42".into()))),
            "42"
        );
        assert_eq!(decode_unix_nano(None), "0");
    }

    #[test]
    fn decodes_two_word_composite() {
        let value = UnixNano::Words { low: 500, high: 1 };
        assert_eq!(decode_unix_nano(Some(&value)), (500i64 + (1i64 << 32)).to_string());
    }

    #[test]
    fn unrecognized_shapes_canonicalize_to_zero() {
        let value: UnixNano = serde_json::from_str("{\"seconds\": 12}").unwrap();
        assert!(matches!(value, UnixNano::Other(_)));
        assert_eq!(decode_unix_nano(Some(&value)), "0");
    }

    #[test]
    fn deserializes_all_wire_shapes() {
        let ts: UnixNano = serde_json::from_str("1700000000000000000").unwrap();
        assert!(matches!(ts, UnixNano::Uint(_)));
        let ts: UnixNano = serde_json::from_str("\"1700000000000000000\"").unwrap();
        assert!(matches!(ts, UnixNano::Text(_)));
        let ts: UnixNano = serde_json::from_str("{\"low\": 500, \"high\": 1}").unwrap();
        assert!(matches!(ts, UnixNano::Words { .. }));
    }

    #[test]
    fn unset_and_numeric_checks() {
        assert!(UnixNano::Uint(0).is_unset());
        assert!(UnixNano::Text(String::new()).is_unset());
        assert!(!UnixNano::Text("0".into()).is_unset());
        assert!(UnixNano::Text("17".into()).is_numeric());
        assert!(!UnixNano::Text("soon".into()).is_numeric());
        assert!(!UnixNano::Other(serde_json::json!({})).is_numeric());
        assert!(UnixNano::Words { low: 0, high: 0 }.is_numeric());
    }

    #[test]
    fn encodes_rfc3339_to_nanos() {
        let nanos = encode_unix_nano("2026-01-01T00:00:00.250Z").unwrap();
        assert_eq!(nanos, "1767225600250000000");
        assert!(encode_unix_nano("not a time").is_err());
    }

    #[test]
    fn latency_is_signed_difference() {
        assert_eq!(latency_ns("100", "350"), 250);
        assert_eq!(latency_ns("350", "100"), -250);
    }

    #[test]
    fn latency_is_exact_at_nanosecond_epochs() {
        assert_eq!(
            latency_ns("1700000000000000000", "1700000000250000001"),
            250_000_001
        );
    }
}
