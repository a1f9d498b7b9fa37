//! Legacy-to-canonical protocol translation.
//!
//! Older agentscope SDKs emit a flat attribute layout (`project.run_id`,
//! `span.kind`, `metadata.*`). Live decode and the schema migration both
//! rewrite that layout into the `gen_ai.*` / `agentscope.*` convention and
//! derive a canonical span name while doing so.

use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};

use crate::attrs::{get_nested, is_truthy};

/// Instrumentation-scope name fragment that identifies a legacy sender.
pub const LEGACY_SCOPE_MARKER: &str = "agentscope.tracing._trace";

/// How long after process start the legacy-sender warning keeps firing.
pub const DEFAULT_WARNING_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Rolling window that bounds how long legacy-protocol warnings are logged.
/// The state is immutable after construction and only ever compared against
/// a caller-supplied instant, so concurrent decodes need no coordination; a
/// benign race on the boundary warning is acceptable.
#[derive(Debug, Clone, Copy)]
pub struct LegacyWarningWindow {
    started: Instant,
    window: Duration,
}

impl LegacyWarningWindow {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(Instant::now(), window)
    }

    pub fn starting_at(started: Instant, window: Duration) -> Self {
        Self { started, window }
    }

    /// Warn on every detection within the window, then go silent. Avoids
    /// log flooding from long-lived legacy senders while still surfacing
    /// the condition early.
    pub fn should_warn(&self, now: Instant) -> bool {
        now.duration_since(self.started) < self.window
    }
}

impl Default for LegacyWarningWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_WINDOW)
    }
}

pub fn is_legacy_scope(scope_name: &str) -> bool {
    scope_name.to_lowercase().contains(LEGACY_SCOPE_MARKER)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub span_name: String,
    pub attributes: Value,
}

/// Rewrite a legacy attribute tree into the canonical convention, deriving
/// the canonical span name as a side effect. Trees that already carry a
/// top-level `gen_ai` group (and non-object trees) pass through unchanged,
/// which makes the translation idempotent. Absent fields degrade to empty
/// strings; this never fails.
pub fn convert_legacy_attributes(attributes: &Value, wire_name: &str) -> Translated {
    let Some(legacy) = attributes.as_object() else {
        return Translated {
            span_name: wire_name.to_string(),
            attributes: attributes.clone(),
        };
    };

    if legacy.get("gen_ai").is_some_and(is_truthy) {
        return Translated {
            span_name: wire_name.to_string(),
            attributes: attributes.clone(),
        };
    }

    let mut gen_ai = json!({
        "conversation": {},
        "request": {},
        "operation": {},
        "agent": {},
        "tool": {},
    });
    let mut function = json!({
        "name": wire_name,
        "input": {},
        "output": {},
    });

    if let Some(run_id) = get_nested(attributes, "project.run_id") {
        gen_ai["conversation"]["id"] = run_id.clone();
    }

    if let Some(input) = get_nested(attributes, "input").filter(|v| is_truthy(v)) {
        function["input"] = input.clone();
    }

    if let Some(output) = get_nested(attributes, "output").filter(|v| is_truthy(v)) {
        function["output"] = output.clone();
        if let Some(usage) = output.get("usage").and_then(Value::as_object) {
            let mut canonical_usage = Map::new();
            if let Some(input_tokens) = usage.get("input_tokens") {
                canonical_usage.insert("input_tokens".into(), input_tokens.clone());
            }
            if let Some(output_tokens) = usage.get("output_tokens") {
                canonical_usage.insert("output_tokens".into(), output_tokens.clone());
            }
            gen_ai["usage"] = Value::Object(canonical_usage);
        }
    }

    let metadata_str = |key: &str| -> String {
        get_nested(attributes, key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let span_kind = get_nested(attributes, "span.kind")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let span_name = match span_kind {
        "AGENT" => {
            let subject = metadata_str("metadata.name");
            gen_ai["operation"]["name"] = json!("invoke_agent");
            gen_ai["agent"]["name"] = json!(subject);
            format!("invoke_agent {subject}")
        }
        "TOOL" => {
            let subject = metadata_str("metadata.name");
            gen_ai["operation"]["name"] = json!("execute_tool");
            gen_ai["tool"]["name"] = json!(subject);
            format!("execute_tool {subject}")
        }
        "LLM" => {
            let subject = metadata_str("metadata.model_name");
            gen_ai["operation"]["name"] = json!("chat");
            gen_ai["request"]["model"] = json!(subject);
            format!("chat {subject}")
        }
        "EMBEDDING" => {
            let subject = metadata_str("metadata.model_name");
            gen_ai["operation"]["name"] = json!("embeddings");
            gen_ai["request"]["model"] = json!(subject);
            format!("embeddings {subject}")
        }
        "FORMATTER" => {
            let subject = metadata_str("metadata.name");
            gen_ai["operation"]["name"] = json!("format");
            format!("format {subject}")
        }
        _ => {
            gen_ai["operation"]["name"] = json!("unknown");
            wire_name.to_string()
        }
    };

    let mut canonical = Map::new();
    canonical.insert("gen_ai".into(), gen_ai);
    canonical.insert("agentscope".into(), json!({ "function": function }));

    Translated {
        span_name,
        attributes: Value::Object(canonical),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn translates_llm_spans() {
        let legacy = json!({
            "project": {"run_id": "r1"},
            "span": {"kind": "LLM"},
            "metadata": {"model_name": "gpt-x"},
        });

        let out = convert_legacy_attributes(&legacy, "call");

        assert_eq!(out.span_name, "chat gpt-x");
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.operation.name"),
            Some(&json!("chat"))
        );
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.request.model"),
            Some(&json!("gpt-x"))
        );
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.conversation.id"),
            Some(&json!("r1"))
        );
    }

    #[test]
    fn translates_agent_and_tool_spans() {
        let agent = json!({"span": {"kind": "AGENT"}, "metadata": {"name": "friday"}});
        let out = convert_legacy_attributes(&agent, "reply");
        assert_eq!(out.span_name, "invoke_agent friday");
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.agent.name"),
            Some(&json!("friday"))
        );

        let tool = json!({"span": {"kind": "TOOL"}, "metadata": {"name": "search"}});
        let out = convert_legacy_attributes(&tool, "call_tool");
        assert_eq!(out.span_name, "execute_tool search");
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.tool.name"),
            Some(&json!("search"))
        );
    }

    #[test]
    fn unrecognized_kind_keeps_wire_name() {
        let legacy = json!({"span": {"kind": "SOMETHING"}});
        let out = convert_legacy_attributes(&legacy, "mystery");
        assert_eq!(out.span_name, "mystery");
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.operation.name"),
            Some(&json!("unknown"))
        );
    }

    #[test]
    fn copies_function_payloads_and_usage() {
        let legacy = json!({
            "span": {"kind": "LLM"},
            "metadata": {"model_name": "m"},
            "input": {"messages": ["hi"]},
            "output": {
                "text": "hello",
                "usage": {"input_tokens": 12, "output_tokens": 3, "time": 0.5},
            },
        });

        let out = convert_legacy_attributes(&legacy, "call");

        assert_eq!(
            get_nested(&out.attributes, "agentscope.function.input"),
            Some(&json!({"messages": ["hi"]}))
        );
        assert_eq!(
            get_nested(&out.attributes, "agentscope.function.name"),
            Some(&json!("call"))
        );
        assert_eq!(
            get_nested(&out.attributes, "gen_ai.usage"),
            Some(&json!({"input_tokens": 12, "output_tokens": 3}))
        );
    }

    #[test]
    fn canonical_input_is_identity_twice() {
        let canonical = json!({
            "gen_ai": {"operation": {"name": "chat"}},
            "extra": 1,
        });

        let once = convert_legacy_attributes(&canonical, "chat m");
        assert_eq!(once.attributes, canonical);
        assert_eq!(once.span_name, "chat m");

        let twice = convert_legacy_attributes(&once.attributes, &once.span_name);
        assert_eq!(twice.attributes, canonical);
        assert_eq!(twice.span_name, "chat m");
    }

    #[test]
    fn non_object_trees_pass_through() {
        let out = convert_legacy_attributes(&json!(null), "name");
        assert_eq!(out.span_name, "name");
        assert_eq!(out.attributes, json!(null));
    }

    #[test]
    fn warning_window_expires() {
        let start = Instant::now();
        let window = LegacyWarningWindow::starting_at(start, Duration::from_secs(300));

        assert!(window.should_warn(start));
        assert!(window.should_warn(start + Duration::from_secs(299)));
        assert!(!window.should_warn(start + Duration::from_secs(300)));
        assert!(!window.should_warn(start + Duration::from_secs(3_000)));
    }

    #[test]
    fn detects_legacy_scope_names() {
        assert!(is_legacy_scope("agentscope.tracing._trace"));
        assert!(is_legacy_scope("Agentscope.Tracing._Trace.v2"));
        assert!(!is_legacy_scope("agentscope.tracing"));
    }
}
