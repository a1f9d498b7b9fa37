//! Span normalization: one raw wire span plus its resource/scope context in,
//! one canonical span out.

use std::time::Instant;

use serde_json::{Map, Value};

use runlens_core::attrs::{load_json_strings, unflatten_object};
use runlens_core::error::{Result, RunlensError};
use runlens_core::ids::decode_identifier;
use runlens_core::model::span::{SpanData, SpanEvent, SpanLink, SpanResource, SpanScope, SpanStatus};
use runlens_core::time::{decode_unix_nano, latency_ns};
use runlens_core::translate::{LegacyWarningWindow, convert_legacy_attributes, is_legacy_scope};

use crate::otlp::raw::{
    RawAnyValue, RawEvent, RawInt, RawKeyValue, RawLink, RawResource, RawResourceSpans, RawScope,
    RawSpan, RawStatus,
};

/// Result of one envelope walk. Skipped spans failed validation; the rest of
/// the batch is unaffected by them.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub spans: Vec<SpanData>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    warning: LegacyWarningWindow,
}

impl Normalizer {
    pub fn new(warning: LegacyWarningWindow) -> Self {
        Self { warning }
    }

    fn validate(raw: &RawSpan) -> Result<()> {
        if decode_identifier(raw.trace_id.as_ref()).is_empty() {
            return Err(RunlensError::Validation("span is missing a trace id".into()));
        }
        if decode_identifier(raw.span_id.as_ref()).is_empty() {
            return Err(RunlensError::Validation("span is missing a span id".into()));
        }
        if raw.name.as_deref().unwrap_or_default().is_empty() {
            return Err(RunlensError::Validation("span is missing a name".into()));
        }
        for (label, value) in [
            ("start", raw.start_time_unix_nano.as_ref()),
            ("end", raw.end_time_unix_nano.as_ref()),
        ] {
            match value {
                None => {
                    return Err(RunlensError::Validation(format!(
                        "span is missing its {label} timestamp"
                    )));
                }
                Some(ts) if ts.is_unset() => {
                    return Err(RunlensError::Validation(format!(
                        "span is missing its {label} timestamp"
                    )));
                }
                Some(ts) if !ts.is_numeric() => {
                    return Err(RunlensError::Validation(format!(
                        "span {label} timestamp is not numeric"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Decode one raw span into its canonical form, translating the legacy
    /// attribute convention when the instrumentation scope identifies a
    /// legacy sender.
    pub fn normalize(
        &self,
        raw: &RawSpan,
        resource: &SpanResource,
        scope: &SpanScope,
    ) -> Result<SpanData> {
        Self::validate(raw)?;

        let trace_id = decode_identifier(raw.trace_id.as_ref());
        let span_id = decode_identifier(raw.span_id.as_ref());
        let parent_span_id = raw
            .parent_span_id
            .as_ref()
            .map(|id| decode_identifier(Some(id)))
            .filter(|id| !id.is_empty());
        let start = decode_unix_nano(raw.start_time_unix_nano.as_ref());
        let end = decode_unix_nano(raw.end_time_unix_nano.as_ref());

        let mut attributes = decode_attributes(&raw.attributes);
        let mut span_name = raw.name.clone().unwrap_or_default();

        if is_legacy_scope(&scope.name) {
            if self.warning.should_warn(Instant::now()) {
                tracing::warn!(
                    scope = %scope.name,
                    "legacy agentscope trace protocol detected; update the sdk to 1.0.9 or newer"
                );
            }
            let translated = convert_legacy_attributes(&attributes, &span_name);
            span_name = translated.span_name;
            attributes = translated.attributes;
        }

        let latency = latency_ns(&start, &end);
        let mut span = SpanData {
            trace_id,
            span_id,
            trace_state: raw.trace_state.clone(),
            parent_span_id,
            flags: raw.flags,
            name: span_name,
            kind: raw.kind.unwrap_or(0),
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            attributes,
            dropped_attributes_count: raw.dropped_attributes_count.unwrap_or(0),
            events: raw.events.iter().map(decode_event).collect(),
            dropped_events_count: raw.dropped_events_count.unwrap_or(0),
            links: raw.links.iter().map(decode_link).collect(),
            dropped_links_count: raw.dropped_links_count.unwrap_or(0),
            status: decode_status(raw.status.as_ref()),
            resource: resource.clone(),
            scope: scope.clone(),
            status_code: 0,
            service_name: None,
            operation_name: None,
            instrumentation_name: None,
            instrumentation_version: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            conversation_id: String::new(),
            latency_ns: latency,
        };
        span.project_index_fields();
        Ok(span)
    }

    /// `Ok(None)` means the span failed validation and should be skipped;
    /// any other error aborts the batch, distinguishing malformed input
    /// from a contract violation.
    pub fn safe_normalize(
        &self,
        raw: &RawSpan,
        resource: &SpanResource,
        scope: &SpanScope,
    ) -> Result<Option<SpanData>> {
        match self.normalize(raw, resource, scope) {
            Ok(span) => Ok(Some(span)),
            Err(RunlensError::Validation(reason)) => {
                tracing::warn!(%reason, "skipping invalid span");
                Ok(None)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to decode span");
                Err(err)
            }
        }
    }

    /// Walk a resource → scope → span envelope, skipping groups without a
    /// resource or scope object. One invalid span never aborts the rest of
    /// the batch; only a decode contract violation does.
    pub fn batch_process(&self, groups: &[RawResourceSpans]) -> Result<DecodedBatch> {
        let mut batch = DecodedBatch::default();
        for group in groups {
            let Some(raw_resource) = &group.resource else {
                continue;
            };
            let resource = decode_resource(raw_resource);
            for scope_group in &group.scope_spans {
                let Some(raw_scope) = &scope_group.scope else {
                    continue;
                };
                let scope = decode_scope(raw_scope);
                for raw in &scope_group.spans {
                    match self.safe_normalize(raw, &resource, &scope)? {
                        Some(span) => batch.spans.push(span),
                        None => batch.skipped += 1,
                    }
                }
            }
        }
        Ok(batch)
    }
}

/// Flat key/value list → canonical attribute tree: build the flat map,
/// parse embedded JSON strings, then unflatten on `.` boundaries.
pub fn decode_attributes(attrs: &[RawKeyValue]) -> Value {
    Value::Object(unflatten_object(load_json_strings(decode_key_values(
        attrs,
    ))))
}

pub fn decode_key_values(attrs: &[RawKeyValue]) -> Map<String, Value> {
    let mut result = Map::new();
    for kv in attrs {
        let Some(key) = kv.key.as_deref().filter(|k| !k.is_empty()) else {
            continue;
        };
        let Some(value) = &kv.value else {
            continue;
        };
        result.insert(key.to_string(), decode_any_value(value));
    }
    result
}

fn decode_any_value(value: &RawAnyValue) -> Value {
    if let Some(b) = value.bool_value {
        return Value::Bool(b);
    }
    if let Some(i) = value.int_value.as_ref().and_then(RawInt::as_i64) {
        return Value::from(i);
    }
    if let Some(d) = value.double_value {
        return serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Some(s) = &value.string_value {
        return Value::String(s.clone());
    }
    if let Some(arr) = &value.array_value {
        return Value::Array(arr.values.iter().map(decode_any_value).collect());
    }
    if let Some(kvs) = &value.kvlist_value {
        return Value::Object(decode_key_values(&kvs.values));
    }
    if let Some(encoded) = value.bytes_value.as_ref().and_then(|b| b.to_base64()) {
        return Value::String(encoded);
    }
    Value::Null
}

pub fn decode_resource(raw: &RawResource) -> SpanResource {
    SpanResource {
        attributes: decode_attributes(&raw.attributes),
        schema_url: raw.schema_url.clone(),
    }
}

pub fn decode_scope(raw: &RawScope) -> SpanScope {
    SpanScope {
        name: raw.name.clone().unwrap_or_default(),
        version: raw.version.clone(),
        attributes: decode_attributes(&raw.attributes),
        schema_url: raw.schema_url.clone(),
    }
}

fn decode_event(raw: &RawEvent) -> SpanEvent {
    SpanEvent {
        name: raw.name.clone().unwrap_or_default(),
        time: decode_unix_nano(raw.time_unix_nano.as_ref()),
        attributes: decode_attributes(&raw.attributes),
        dropped_attributes_count: raw.dropped_attributes_count.unwrap_or(0),
    }
}

fn decode_link(raw: &RawLink) -> SpanLink {
    SpanLink {
        trace_id: decode_identifier(raw.trace_id.as_ref()),
        span_id: decode_identifier(raw.span_id.as_ref()),
        trace_state: raw.trace_state.clone(),
        flags: raw.flags,
        attributes: decode_attributes(&raw.attributes),
        dropped_attributes_count: raw.dropped_attributes_count.unwrap_or(0),
    }
}

fn decode_status(raw: Option<&RawStatus>) -> SpanStatus {
    match raw {
        Some(status) => SpanStatus {
            code: status.code.unwrap_or(0),
            message: status.message.clone().unwrap_or_default(),
        },
        None => SpanStatus::default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use runlens_core::attrs::get_nested;
    use runlens_core::ids::RawId;
    use runlens_core::time::UnixNano;

    use super::*;

    fn raw_span(name: &str, start: u64, end: u64) -> RawSpan {
        RawSpan {
            trace_id: Some(RawId::Bytes(vec![1; 16])),
            span_id: Some(RawId::Bytes(vec![2; 8])),
            name: Some(name.to_string()),
            kind: Some(1),
            start_time_unix_nano: Some(UnixNano::Uint(start)),
            end_time_unix_nano: Some(UnixNano::Uint(end)),
            ..RawSpan::default()
        }
    }

    fn string_attr(key: &str, value: &str) -> RawKeyValue {
        RawKeyValue {
            key: Some(key.to_string()),
            value: Some(RawAnyValue {
                string_value: Some(value.to_string()),
                ..RawAnyValue::default()
            }),
        }
    }

    fn int_attr(key: &str, value: i64) -> RawKeyValue {
        RawKeyValue {
            key: Some(key.to_string()),
            value: Some(RawAnyValue {
                int_value: Some(RawInt::Num(value)),
                ..RawAnyValue::default()
            }),
        }
    }

    fn plain_scope(name: &str) -> SpanScope {
        SpanScope {
            name: name.to_string(),
            ..SpanScope::default()
        }
    }

    #[test]
    fn normalizes_valid_span_with_exact_latency() {
        let raw = raw_span("call", 1_700_000_000_000_000_000, 1_700_000_000_250_000_000);
        let span = Normalizer::default()
            .normalize(&raw, &SpanResource::default(), &plain_scope("sdk"))
            .unwrap();

        assert_eq!(span.trace_id, "01".repeat(16));
        assert_eq!(span.span_id, "02".repeat(8));
        assert_eq!(span.latency_ns, 250_000_000);
        assert_eq!(span.conversation_id, "unknown");
    }

    #[test]
    fn rejects_missing_required_fields() {
        let normalizer = Normalizer::default();
        let resource = SpanResource::default();
        let scope = plain_scope("sdk");

        let mut missing_trace = raw_span("call", 1, 2);
        missing_trace.trace_id = None;
        let mut empty_span_id = raw_span("call", 1, 2);
        empty_span_id.span_id = Some(RawId::Bytes(vec![]));
        let mut unnamed = raw_span("call", 1, 2);
        unnamed.name = Some(String::new());
        let mut zero_start = raw_span("call", 0, 2);
        zero_start.start_time_unix_nano = Some(UnixNano::Uint(0));
        let mut bad_end = raw_span("call", 1, 2);
        bad_end.end_time_unix_nano = Some(UnixNano::Text("soon".into()));

        for raw in [missing_trace, empty_span_id, unnamed, zero_start, bad_end] {
            let result = normalizer.safe_normalize(&raw, &resource, &scope).unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn translates_legacy_scope_spans() {
        let mut raw = raw_span("call", 100, 350);
        raw.attributes = vec![
            string_attr("project.run_id", "r1"),
            string_attr("span.kind", "LLM"),
            string_attr("metadata.model_name", "gpt-x"),
        ];

        let span = Normalizer::default()
            .normalize(
                &raw,
                &SpanResource::default(),
                &plain_scope("agentscope.tracing._trace"),
            )
            .unwrap();

        assert_eq!(span.name, "chat gpt-x");
        assert_eq!(span.operation_name.as_deref(), Some("chat"));
        assert_eq!(span.model.as_deref(), Some("gpt-x"));
        assert_eq!(span.conversation_id, "r1");
    }

    #[test]
    fn non_legacy_scope_keeps_attributes_verbatim() {
        let mut raw = raw_span("call", 100, 350);
        raw.attributes = vec![string_attr("span.kind", "LLM")];

        let span = Normalizer::default()
            .normalize(&raw, &SpanResource::default(), &plain_scope("modern-sdk"))
            .unwrap();

        assert_eq!(span.name, "call");
        assert_eq!(get_nested(&span.attributes, "span.kind"), Some(&json!("LLM")));
    }

    #[test]
    fn decodes_nested_and_embedded_json_attributes() {
        let mut raw = raw_span("call", 100, 350);
        raw.attributes = vec![
            string_attr("gen_ai.conversation.id", "run-7"),
            string_attr("gen_ai.operation.name", "chat"),
            int_attr("gen_ai.usage.input_tokens", 9),
            int_attr("gen_ai.usage.output_tokens", 2),
            string_attr("payload", "{\"messages\": [\"hi\"]}"),
        ];

        let span = Normalizer::default()
            .normalize(&raw, &SpanResource::default(), &plain_scope("sdk"))
            .unwrap();

        assert_eq!(span.conversation_id, "run-7");
        assert_eq!(span.input_tokens, Some(9));
        assert_eq!(span.total_tokens, Some(11));
        assert_eq!(
            get_nested(&span.attributes, "payload.messages"),
            Some(&json!(["hi"]))
        );
    }

    #[test]
    fn batch_skips_groups_without_resource_or_scope() {
        let make_group = |with_resource: bool, with_scope: bool, name: &str| RawResourceSpans {
            resource: with_resource.then(RawResource::default),
            scope_spans: vec![crate::otlp::raw::RawScopeSpans {
                scope: with_scope.then(|| RawScope {
                    name: Some("sdk".into()),
                    ..RawScope::default()
                }),
                spans: vec![raw_span(name, 100, 200)],
                schema_url: None,
            }],
            schema_url: None,
        };

        let groups = vec![
            make_group(true, true, "one"),
            make_group(true, false, "two"),
            make_group(true, true, "three"),
            make_group(false, true, "four"),
        ];

        let batch = Normalizer::default().batch_process(&groups).unwrap();
        let names: Vec<&str> = batch.spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["one", "three"]);
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn batch_counts_invalid_spans_and_continues() {
        let group = RawResourceSpans {
            resource: Some(RawResource::default()),
            scope_spans: vec![crate::otlp::raw::RawScopeSpans {
                scope: Some(RawScope {
                    name: Some("sdk".into()),
                    ..RawScope::default()
                }),
                spans: vec![
                    raw_span("good", 100, 200),
                    raw_span("", 100, 200),
                    raw_span("also-good", 300, 400),
                ],
                schema_url: None,
            }],
            schema_url: None,
        };

        let batch = Normalizer::default().batch_process(&[group]).unwrap();
        assert_eq!(batch.spans.len(), 2);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn decodes_events_links_and_status() {
        let mut raw = raw_span("call", 100, 350);
        raw.events = vec![RawEvent {
            name: Some("retry".into()),
            time_unix_nano: Some(UnixNano::Uint(120)),
            attributes: vec![int_attr("attempt", 2)],
            dropped_attributes_count: Some(0),
        }];
        raw.links = vec![RawLink {
            trace_id: Some(RawId::Bytes(vec![9; 16])),
            span_id: Some(RawId::Bytes(vec![8; 8])),
            ..RawLink::default()
        }];
        raw.status = Some(RawStatus {
            code: Some(2),
            message: Some("boom".into()),
        });

        let span = Normalizer::default()
            .normalize(&raw, &SpanResource::default(), &plain_scope("sdk"))
            .unwrap();

        assert_eq!(span.events[0].name, "retry");
        assert_eq!(span.events[0].time, "120");
        assert_eq!(span.events[0].attributes, json!({"attempt": 2}));
        assert_eq!(span.links[0].trace_id, "09".repeat(16));
        assert_eq!(span.status, SpanStatus { code: 2, message: "boom".into() });
        assert_eq!(span.status_code, 2);
    }

    #[test]
    fn presence_beats_zero_values() {
        let zero_int = RawAnyValue {
            int_value: Some(RawInt::Num(0)),
            ..RawAnyValue::default()
        };
        assert_eq!(decode_any_value(&zero_int), json!(0));

        let falsy_bool = RawAnyValue {
            bool_value: Some(false),
            ..RawAnyValue::default()
        };
        assert_eq!(decode_any_value(&falsy_bool), json!(false));

        let absent = RawAnyValue::default();
        assert_eq!(decode_any_value(&absent), Value::Null);
    }

    #[test]
    fn empty_bytes_decode_to_null() {
        let empty = RawAnyValue {
            bytes_value: Some(crate::otlp::raw::RawBytes::Bytes(vec![])),
            ..RawAnyValue::default()
        };
        assert_eq!(decode_any_value(&empty), Value::Null);

        let blob = RawAnyValue {
            bytes_value: Some(crate::otlp::raw::RawBytes::Bytes(vec![1, 2, 3])),
            ..RawAnyValue::default()
        };
        assert_eq!(decode_any_value(&blob), json!("AQID"));
    }
}
