//! Transient wire-level envelope types.
//!
//! A `RawSpan` exists only for the duration of one decode call. The structs
//! deserialize directly from OTLP/JSON bodies (camelCase per the OTLP JSON
//! mapping, with snake_case aliases for senders that serialize protobuf
//! objects verbatim) and convert losslessly from the `opentelemetry-proto`
//! prost types used by both binary transports. Every field is lenient:
//! unrecognized shapes land in catch-all variants and are sorted out by
//! validation, so one malformed span never aborts envelope parsing.

use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};
use serde_json::Value;

use opentelemetry_proto::tonic::common::v1 as pb_common;
use opentelemetry_proto::tonic::resource::v1 as pb_resource;
use opentelemetry_proto::tonic::trace::v1 as pb_trace;
use runlens_core::ids::RawId;
use runlens_core::time::UnixNano;

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawResourceSpans {
    pub resource: Option<RawResource>,
    #[serde(alias = "scope_spans", deserialize_with = "lenient_vec")]
    pub scope_spans: Vec<RawScopeSpans>,
    #[serde(alias = "schema_url", deserialize_with = "lenient_opt")]
    pub schema_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawResource {
    #[serde(deserialize_with = "lenient_vec")]
    pub attributes: Vec<RawKeyValue>,
    #[serde(alias = "schema_url", deserialize_with = "lenient_opt")]
    pub schema_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawScopeSpans {
    pub scope: Option<RawScope>,
    #[serde(deserialize_with = "lenient_vec")]
    pub spans: Vec<RawSpan>,
    #[serde(alias = "schema_url", deserialize_with = "lenient_opt")]
    pub schema_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawScope {
    #[serde(deserialize_with = "lenient_opt")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_opt")]
    pub version: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub attributes: Vec<RawKeyValue>,
    #[serde(alias = "schema_url", deserialize_with = "lenient_opt")]
    pub schema_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawSpan {
    #[serde(alias = "trace_id")]
    pub trace_id: Option<RawId>,
    #[serde(alias = "span_id")]
    pub span_id: Option<RawId>,
    #[serde(alias = "trace_state", deserialize_with = "lenient_opt")]
    pub trace_state: Option<String>,
    #[serde(alias = "parent_span_id")]
    pub parent_span_id: Option<RawId>,
    #[serde(deserialize_with = "lenient_opt")]
    pub flags: Option<u32>,
    #[serde(deserialize_with = "lenient_opt")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_opt")]
    pub kind: Option<i32>,
    #[serde(alias = "start_time_unix_nano")]
    pub start_time_unix_nano: Option<UnixNano>,
    #[serde(alias = "end_time_unix_nano")]
    pub end_time_unix_nano: Option<UnixNano>,
    #[serde(deserialize_with = "lenient_vec")]
    pub attributes: Vec<RawKeyValue>,
    #[serde(alias = "dropped_attributes_count", deserialize_with = "lenient_opt")]
    pub dropped_attributes_count: Option<u32>,
    #[serde(deserialize_with = "lenient_vec")]
    pub events: Vec<RawEvent>,
    #[serde(alias = "dropped_events_count", deserialize_with = "lenient_opt")]
    pub dropped_events_count: Option<u32>,
    #[serde(deserialize_with = "lenient_vec")]
    pub links: Vec<RawLink>,
    #[serde(alias = "dropped_links_count", deserialize_with = "lenient_opt")]
    pub dropped_links_count: Option<u32>,
    #[serde(deserialize_with = "lenient_opt")]
    pub status: Option<RawStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(deserialize_with = "lenient_opt")]
    pub name: Option<String>,
    #[serde(alias = "time_unix_nano")]
    pub time_unix_nano: Option<UnixNano>,
    #[serde(deserialize_with = "lenient_vec")]
    pub attributes: Vec<RawKeyValue>,
    #[serde(alias = "dropped_attributes_count", deserialize_with = "lenient_opt")]
    pub dropped_attributes_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawLink {
    #[serde(alias = "trace_id")]
    pub trace_id: Option<RawId>,
    #[serde(alias = "span_id")]
    pub span_id: Option<RawId>,
    #[serde(alias = "trace_state", deserialize_with = "lenient_opt")]
    pub trace_state: Option<String>,
    #[serde(deserialize_with = "lenient_opt")]
    pub flags: Option<u32>,
    #[serde(deserialize_with = "lenient_vec")]
    pub attributes: Vec<RawKeyValue>,
    #[serde(alias = "dropped_attributes_count", deserialize_with = "lenient_opt")]
    pub dropped_attributes_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStatus {
    #[serde(deserialize_with = "lenient_opt")]
    pub code: Option<i64>,
    #[serde(deserialize_with = "lenient_opt")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawKeyValue {
    #[serde(deserialize_with = "lenient_opt")]
    pub key: Option<String>,
    #[serde(deserialize_with = "lenient_opt")]
    pub value: Option<RawAnyValue>,
}

/// A typed wire value. Exactly one field is set by well-behaved senders;
/// presence is explicit, so zero values are never mistaken for absent ones.
/// When a malformed sender sets several, decoding applies a fixed precedence
/// (bool, int, double, string, list, map, non-empty bytes).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawAnyValue {
    #[serde(alias = "bool_value", deserialize_with = "lenient_opt")]
    pub bool_value: Option<bool>,
    #[serde(alias = "int_value")]
    pub int_value: Option<RawInt>,
    #[serde(alias = "double_value", deserialize_with = "lenient_opt")]
    pub double_value: Option<f64>,
    #[serde(alias = "string_value", deserialize_with = "lenient_opt")]
    pub string_value: Option<String>,
    #[serde(alias = "array_value", deserialize_with = "lenient_opt")]
    pub array_value: Option<RawArrayValue>,
    #[serde(alias = "kvlist_value", deserialize_with = "lenient_opt")]
    pub kvlist_value: Option<RawKeyValueList>,
    #[serde(alias = "bytes_value")]
    pub bytes_value: Option<RawBytes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawArrayValue {
    #[serde(deserialize_with = "lenient_vec")]
    pub values: Vec<RawAnyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawKeyValueList {
    #[serde(deserialize_with = "lenient_vec")]
    pub values: Vec<RawKeyValue>,
}

/// 64-bit integers arrive as JSON numbers or, per the proto3 JSON mapping,
/// as decimal strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawInt {
    Num(i64),
    Text(String),
    Other(Value),
}

impl RawInt {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawInt::Num(n) => Some(*n),
            RawInt::Text(s) => s.trim().parse().ok(),
            RawInt::Other(_) => None,
        }
    }
}

/// Byte blobs arrive as base64 strings (OTLP/JSON) or raw byte arrays.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawBytes {
    Text(String),
    Bytes(Vec<u8>),
    Other(Value),
}

impl RawBytes {
    /// Base64 rendering of a non-empty blob.
    pub fn to_base64(&self) -> Option<String> {
        use base64::Engine as _;
        match self {
            RawBytes::Text(s) if !s.is_empty() => Some(s.clone()),
            RawBytes::Bytes(b) if !b.is_empty() => {
                Some(base64::engine::general_purpose::STANDARD.encode(b))
            }
            _ => None,
        }
    }
}

impl From<pb_trace::ResourceSpans> for RawResourceSpans {
    fn from(rs: pb_trace::ResourceSpans) -> Self {
        Self {
            resource: rs.resource.map(RawResource::from),
            scope_spans: rs.scope_spans.into_iter().map(RawScopeSpans::from).collect(),
            schema_url: none_if_empty(rs.schema_url),
        }
    }
}

impl From<pb_resource::Resource> for RawResource {
    fn from(resource: pb_resource::Resource) -> Self {
        Self {
            attributes: resource.attributes.into_iter().map(RawKeyValue::from).collect(),
            schema_url: None,
        }
    }
}

impl From<pb_trace::ScopeSpans> for RawScopeSpans {
    fn from(ss: pb_trace::ScopeSpans) -> Self {
        Self {
            scope: ss.scope.map(RawScope::from),
            spans: ss.spans.into_iter().map(RawSpan::from).collect(),
            schema_url: none_if_empty(ss.schema_url),
        }
    }
}

impl From<pb_common::InstrumentationScope> for RawScope {
    fn from(scope: pb_common::InstrumentationScope) -> Self {
        Self {
            name: Some(scope.name),
            version: none_if_empty(scope.version),
            attributes: scope.attributes.into_iter().map(RawKeyValue::from).collect(),
            schema_url: None,
        }
    }
}

impl From<pb_trace::Span> for RawSpan {
    fn from(span: pb_trace::Span) -> Self {
        Self {
            trace_id: Some(RawId::from_bytes(span.trace_id)),
            span_id: Some(RawId::from_bytes(span.span_id)),
            trace_state: none_if_empty(span.trace_state),
            parent_span_id: (!span.parent_span_id.is_empty())
                .then(|| RawId::from_bytes(span.parent_span_id)),
            flags: Some(span.flags),
            name: Some(span.name),
            kind: Some(span.kind),
            start_time_unix_nano: Some(UnixNano::Uint(span.start_time_unix_nano)),
            end_time_unix_nano: Some(UnixNano::Uint(span.end_time_unix_nano)),
            attributes: span.attributes.into_iter().map(RawKeyValue::from).collect(),
            dropped_attributes_count: Some(span.dropped_attributes_count),
            events: span.events.into_iter().map(RawEvent::from).collect(),
            dropped_events_count: Some(span.dropped_events_count),
            links: span.links.into_iter().map(RawLink::from).collect(),
            dropped_links_count: Some(span.dropped_links_count),
            status: span.status.map(RawStatus::from),
        }
    }
}

impl From<pb_trace::span::Event> for RawEvent {
    fn from(event: pb_trace::span::Event) -> Self {
        Self {
            name: Some(event.name),
            time_unix_nano: Some(UnixNano::Uint(event.time_unix_nano)),
            attributes: event.attributes.into_iter().map(RawKeyValue::from).collect(),
            dropped_attributes_count: Some(event.dropped_attributes_count),
        }
    }
}

impl From<pb_trace::span::Link> for RawLink {
    fn from(link: pb_trace::span::Link) -> Self {
        Self {
            trace_id: Some(RawId::from_bytes(link.trace_id)),
            span_id: Some(RawId::from_bytes(link.span_id)),
            trace_state: none_if_empty(link.trace_state),
            flags: Some(link.flags),
            attributes: link.attributes.into_iter().map(RawKeyValue::from).collect(),
            dropped_attributes_count: Some(link.dropped_attributes_count),
        }
    }
}

impl From<pb_trace::Status> for RawStatus {
    fn from(status: pb_trace::Status) -> Self {
        Self {
            code: Some(i64::from(status.code)),
            message: Some(status.message),
        }
    }
}

impl From<pb_common::KeyValue> for RawKeyValue {
    fn from(kv: pb_common::KeyValue) -> Self {
        Self {
            key: Some(kv.key),
            value: kv.value.map(RawAnyValue::from),
        }
    }
}

impl From<pb_common::AnyValue> for RawAnyValue {
    fn from(value: pb_common::AnyValue) -> Self {
        use pb_common::any_value::Value as Pb;

        let mut raw = RawAnyValue::default();
        match value.value {
            Some(Pb::BoolValue(b)) => raw.bool_value = Some(b),
            Some(Pb::IntValue(i)) => raw.int_value = Some(RawInt::Num(i)),
            Some(Pb::DoubleValue(d)) => raw.double_value = Some(d),
            Some(Pb::StringValue(s)) => raw.string_value = Some(s),
            Some(Pb::ArrayValue(arr)) => {
                raw.array_value = Some(RawArrayValue {
                    values: arr.values.into_iter().map(RawAnyValue::from).collect(),
                });
            }
            Some(Pb::KvlistValue(kvs)) => {
                raw.kvlist_value = Some(RawKeyValueList {
                    values: kvs.values.into_iter().map(RawKeyValue::from).collect(),
                });
            }
            Some(Pb::BytesValue(b)) => raw.bytes_value = Some(RawBytes::Bytes(b)),
            None => {}
        }
        raw
    }
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_otlp_json_camel_case() {
        let group: RawResourceSpans = serde_json::from_value(json!({
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": "agent-app"}}
            ]},
            "scopeSpans": [{
                "scope": {"name": "sdk", "version": "1.1.0"},
                "spans": [{
                    "traceId": "0102030405060708090a0b0c0d0e0f10",
                    "spanId": "0102030405060708",
                    "name": "chat m",
                    "kind": 1,
                    "startTimeUnixNano": "100",
                    "endTimeUnixNano": "350"
                }]
            }]
        }))
        .unwrap();

        assert!(group.resource.is_some());
        let span = &group.scope_spans[0].spans[0];
        assert_eq!(span.name.as_deref(), Some("chat m"));
        assert!(matches!(span.start_time_unix_nano, Some(UnixNano::Text(_))));
    }

    #[test]
    fn deserializes_snake_case_aliases_and_word_timestamps() {
        let span: RawSpan = serde_json::from_value(json!({
            "trace_id": [1, 2, 3],
            "span_id": "0102030405060708",
            "name": "call",
            "start_time_unix_nano": {"low": 500, "high": 1},
            "end_time_unix_nano": 1000,
            "attributes": [
                {"key": "span.kind", "value": {"string_value": "LLM"}}
            ]
        }))
        .unwrap();

        assert!(matches!(span.trace_id, Some(RawId::Bytes(_))));
        assert!(matches!(
            span.start_time_unix_nano,
            Some(UnixNano::Words { low: 500, high: 1 })
        ));
        assert_eq!(span.attributes.len(), 1);
    }

    #[test]
    fn malformed_spans_are_dropped_not_fatal() {
        let group: RawResourceSpans = serde_json::from_value(json!({
            "resource": {"attributes": []},
            "scopeSpans": [{
                "scope": {"name": "sdk"},
                "spans": ["not a span", {"name": "ok"}]
            }]
        }))
        .unwrap();

        assert_eq!(group.scope_spans[0].spans.len(), 1);
        assert_eq!(group.scope_spans[0].spans[0].name.as_deref(), Some("ok"));
    }

    #[test]
    fn converts_prost_spans() {
        let pb = pb_trace::Span {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            parent_span_id: vec![],
            name: "call".into(),
            kind: 3,
            start_time_unix_nano: 100,
            end_time_unix_nano: 350,
            status: Some(pb_trace::Status {
                code: 2,
                message: "boom".into(),
            }),
            ..Default::default()
        };

        let raw = RawSpan::from(pb);
        assert!(raw.parent_span_id.is_none());
        assert_eq!(raw.kind, Some(3));
        assert_eq!(raw.status.as_ref().and_then(|s| s.code), Some(2));
    }

    #[test]
    fn int_values_accept_strings() {
        assert_eq!(RawInt::Num(7).as_i64(), Some(7));
        assert_eq!(RawInt::Text("12".into()).as_i64(), Some(12));
        assert_eq!(RawInt::Text("x".into()).as_i64(), None);
    }
}
