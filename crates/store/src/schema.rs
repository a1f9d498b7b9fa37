//! Canonical span table: one row per span, identity on the span id, with an
//! index per derived field used for filtering.

pub const SPANS_TABLE: &str = "spans";
pub const BACKUP_TABLE: &str = "spans_legacy_backup";
pub const LEGACY_VIEW: &str = "model_invocations";

/// Columns that only the canonical layout carries; their presence marks a
/// table that needs no migration.
pub const MARKER_COLUMNS: [&str; 2] = ["span_id", "instrumentation_version"];

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  id TEXT PRIMARY KEY,
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  trace_state TEXT,
  parent_span_id TEXT,
  flags INTEGER,
  name TEXT NOT NULL,
  kind INTEGER NOT NULL,
  start_time_unix_nano TEXT NOT NULL,
  end_time_unix_nano TEXT NOT NULL,
  attributes TEXT NOT NULL,
  dropped_attributes_count INTEGER,
  events TEXT,
  dropped_events_count INTEGER,
  links TEXT,
  dropped_links_count INTEGER,
  status TEXT NOT NULL,
  resource TEXT NOT NULL,
  scope TEXT NOT NULL,
  status_code INTEGER,
  service_name TEXT,
  operation_name TEXT,
  instrumentation_name TEXT,
  instrumentation_version TEXT,
  model TEXT,
  input_tokens BIGINT,
  output_tokens BIGINT,
  total_tokens BIGINT,
  conversation_id TEXT,
  latency_ns BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_trace_id ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_span_id ON spans(span_id);
CREATE INDEX IF NOT EXISTS idx_spans_parent_span_id ON spans(parent_span_id);
CREATE INDEX IF NOT EXISTS idx_spans_start_time ON spans(start_time_unix_nano);
CREATE INDEX IF NOT EXISTS idx_spans_status_code ON spans(status_code);
CREATE INDEX IF NOT EXISTS idx_spans_latency_ns ON spans(latency_ns);
CREATE INDEX IF NOT EXISTS idx_spans_service_name ON spans(service_name);
CREATE INDEX IF NOT EXISTS idx_spans_operation_name ON spans(operation_name);
CREATE INDEX IF NOT EXISTS idx_spans_instrumentation_name ON spans(instrumentation_name);
CREATE INDEX IF NOT EXISTS idx_spans_model ON spans(model);
CREATE INDEX IF NOT EXISTS idx_spans_input_tokens ON spans(input_tokens);
CREATE INDEX IF NOT EXISTS idx_spans_output_tokens ON spans(output_tokens);
CREATE INDEX IF NOT EXISTS idx_spans_total_tokens ON spans(total_tokens);
CREATE INDEX IF NOT EXISTS idx_spans_conversation_id ON spans(conversation_id);
"#;
