use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attrs::{get_nested, value_to_string};

/// Conversation id used when none can be derived from the attribute tree.
pub const UNKNOWN_CONVERSATION: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: i64,
    pub message: String,
}

/// Service identity shared by every span of one envelope batch; embedded per
/// span rather than persisted separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanResource {
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
}

impl Default for SpanResource {
    fn default() -> Self {
        Self {
            attributes: Value::Object(Map::new()),
            schema_url: None,
        }
    }
}

/// Instrumentation identity shared by every span of one scope group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanScope {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
}

impl Default for SpanScope {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: None,
            attributes: Value::Object(Map::new()),
            schema_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time: String,
    pub attributes: Value,
    pub dropped_attributes_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    pub attributes: Value,
    pub dropped_attributes_count: u32,
}

/// The persisted unit: one canonical span, created once per decode and
/// immutable afterwards. Timestamps are canonical decimal-nanosecond
/// strings; the trailing fields are projections of the attribute tree kept
/// for efficient filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    pub name: String,
    pub kind: i32,
    pub start_time_unix_nano: String,
    pub end_time_unix_nano: String,
    pub attributes: Value,
    pub dropped_attributes_count: u32,
    pub events: Vec<SpanEvent>,
    pub dropped_events_count: u32,
    pub links: Vec<SpanLink>,
    pub dropped_links_count: u32,
    pub status: SpanStatus,
    pub resource: SpanResource,
    pub scope: SpanScope,

    pub status_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
    pub conversation_id: String,
    pub latency_ns: i64,
}

impl SpanData {
    /// Fill the derived indexing fields from the (already canonical)
    /// attribute tree, the resource and the scope.
    pub fn project_index_fields(&mut self) {
        self.status_code = self.status.code;
        self.service_name = nested_string(&self.resource.attributes, "service.name");
        self.operation_name = nested_string(&self.attributes, "gen_ai.operation.name");
        self.model = nested_string(&self.attributes, "gen_ai.request.model");

        self.instrumentation_name = nested_string(&self.scope.attributes, "server.name")
            .or_else(|| (!self.scope.name.is_empty()).then(|| self.scope.name.clone()));
        self.instrumentation_version = nested_string(&self.scope.attributes, "server.version")
            .or_else(|| self.scope.version.clone());

        self.input_tokens = nested_i64(&self.attributes, "gen_ai.usage.input_tokens");
        self.output_tokens = nested_i64(&self.attributes, "gen_ai.usage.output_tokens");
        self.total_tokens = match (self.input_tokens, self.output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            (Some(i), None) => Some(i),
            (None, Some(o)) => Some(o),
            (None, None) => None,
        };

        self.conversation_id = derive_conversation_id(&self.attributes);
    }
}

/// Conversation id from the canonical key, falling back to the legacy run-id
/// key, falling back to `"unknown"`.
pub fn derive_conversation_id(attributes: &Value) -> String {
    for path in ["gen_ai.conversation.id", "project.run_id"] {
        if let Some(value) = get_nested(attributes, path) {
            if !value.is_null() {
                return value_to_string(value);
            }
        }
    }
    UNKNOWN_CONVERSATION.to_string()
}

fn nested_string(tree: &Value, path: &str) -> Option<String> {
    get_nested(tree, path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn nested_i64(tree: &Value, path: &str) -> Option<i64> {
    let value = get_nested(tree, path)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
