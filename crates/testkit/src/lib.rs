//! Builders for OTLP trace envelopes used across the integration tests.

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value as PbValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(PbValue::StringValue(value.to_string())),
        }),
    }
}

pub fn int_attr(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(PbValue::IntValue(value)),
        }),
    }
}

pub fn span(seed: u8, name: &str, start: u64, end: u64, attributes: Vec<KeyValue>) -> Span {
    Span {
        trace_id: vec![seed; 16],
        span_id: vec![seed; 8],
        name: name.to_string(),
        kind: 1,
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        attributes,
        status: Some(Status {
            code: 1,
            message: String::new(),
        }),
        ..Default::default()
    }
}

/// Attributes the way a modern sender emits them: flat `gen_ai.*` keys.
pub fn genai_chat_attributes(conversation_id: &str, model: &str) -> Vec<KeyValue> {
    vec![
        string_attr("gen_ai.conversation.id", conversation_id),
        string_attr("gen_ai.operation.name", "chat"),
        string_attr("gen_ai.request.model", model),
        int_attr("gen_ai.usage.input_tokens", 9),
        int_attr("gen_ai.usage.output_tokens", 2),
    ]
}

/// Attributes the way a pre-1.0.9 agentscope sender emits them.
pub fn legacy_llm_attributes(run_id: &str, model: &str) -> Vec<KeyValue> {
    vec![
        string_attr("project.run_id", run_id),
        string_attr("span.kind", "LLM"),
        string_attr("metadata.model_name", model),
    ]
}

pub fn trace_request(
    service_name: &str,
    scope_name: &str,
    spans: Vec<Span>,
) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(Resource {
                attributes: vec![string_attr("service.name", service_name)],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                scope: Some(InstrumentationScope {
                    name: scope_name.to_string(),
                    version: "1.1.0".to_string(),
                    attributes: vec![],
                    dropped_attributes_count: 0,
                }),
                spans,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}
