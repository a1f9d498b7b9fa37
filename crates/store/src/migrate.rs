//! One-shot, idempotent migration of the legacy span table to the canonical
//! layout. Legacy rows are re-derived with the same attribute decoding and
//! protocol translation the live pipeline uses, so both paths converge on
//! identical canonical spans.

use duckdb::types::ValueRef;
use serde::Serialize;
use serde_json::{Map, Value};

use runlens_core::attrs::{get_nested, is_truthy, unflatten_object, value_to_string};
use runlens_core::error::{Result, RunlensError};
use runlens_core::model::span::{
    SpanData, SpanEvent, SpanResource, SpanScope, SpanStatus, UNKNOWN_CONVERSATION,
};
use runlens_core::time::{encode_unix_nano, latency_ns};
use runlens_core::translate::convert_legacy_attributes;

use crate::Store;
use crate::db::{column_exists, scalar_usize, table_columns, table_exists};
use crate::schema::{BACKUP_TABLE, LEGACY_VIEW, MARKER_COLUMNS, SCHEMA_SQL, SPANS_TABLE};
use crate::write::insert_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// No span table existed; the canonical schema was created from scratch.
    Fresh,
    /// The table already carries the canonical marker columns.
    AlreadyCanonical,
    /// Legacy rows were converted into a freshly created canonical table.
    Migrated,
}

/// Structured result of one migration run, queryable by callers instead of
/// living only in the log output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    pub migrated: usize,
    pub failed: usize,
    pub table_rows: usize,
    pub count_mismatch: bool,
}

impl MigrationReport {
    fn new(outcome: MigrationOutcome) -> Self {
        Self {
            outcome,
            migrated: 0,
            failed: 0,
            table_rows: 0,
            count_mismatch: false,
        }
    }
}

impl Store {
    /// Migrate the span table to the canonical layout, creating it when
    /// absent. Runs before the receivers accept traffic; strictly
    /// sequential, batched to keep memory bounded. Per-row conversion
    /// failures are counted and logged, never fatal.
    pub fn migrate_legacy_spans(&self, batch_size: usize) -> Result<MigrationReport> {
        let batch_size = batch_size.max(1);
        let mut conn = self.conn();

        if !table_exists(&conn, SPANS_TABLE)? {
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| RunlensError::Store(format!("failed to create span schema: {e}")))?;
            tracing::info!("no span table found; created canonical schema");
            return Ok(MigrationReport::new(MigrationOutcome::Fresh));
        }

        let mut canonical = true;
        for column in MARKER_COLUMNS {
            canonical = canonical && column_exists(&conn, SPANS_TABLE, column)?;
        }
        if canonical {
            // Re-applying the DDL keeps the index set complete on tables
            // created by older builds.
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| RunlensError::Store(format!("failed to refresh span schema: {e}")))?;
            tracing::debug!("span table already canonical; nothing to migrate");
            return Ok(MigrationReport::new(MigrationOutcome::AlreadyCanonical));
        }

        tracing::info!("legacy span table detected; migrating to canonical layout");

        conn.execute_batch(&format!("DROP VIEW IF EXISTS {LEGACY_VIEW};"))
            .map_err(|e| RunlensError::Store(format!("failed to drop legacy view: {e}")))?;

        if table_exists(&conn, BACKUP_TABLE)? {
            tracing::warn!("dropping stale backup table from a previous migration attempt");
            conn.execute_batch(&format!("DROP TABLE {BACKUP_TABLE};"))
                .map_err(|e| RunlensError::Store(format!("failed to drop stale backup: {e}")))?;
        }

        conn.execute_batch(&format!("ALTER TABLE {SPANS_TABLE} RENAME TO {BACKUP_TABLE};"))
            .map_err(|e| RunlensError::Store(format!("failed to back up legacy table: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| RunlensError::Store(format!("failed to create span schema: {e}")))?;

        let columns = table_columns(&conn, BACKUP_TABLE)?;
        let total = scalar_usize(&conn, &format!("SELECT COUNT(*) FROM {BACKUP_TABLE}"))?;
        tracing::info!(rows = total, "migrating legacy span rows");

        let mut migrated = 0usize;
        let mut failed = 0usize;
        let mut offset = 0usize;
        while offset < total {
            let mut converted = Vec::new();
            {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT * FROM {BACKUP_TABLE} ORDER BY id LIMIT {batch_size} OFFSET {offset}"
                    ))
                    .map_err(|e| RunlensError::Store(format!("failed to read backup rows: {e}")))?;
                let mut rows = stmt
                    .query([])
                    .map_err(|e| RunlensError::Store(format!("failed to read backup rows: {e}")))?;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| RunlensError::Store(format!("failed to read backup rows: {e}")))?
                {
                    let record = record_from_row(row, &columns);
                    match convert_legacy_row(&record) {
                        Ok(span) => converted.push(span),
                        Err(err) => {
                            failed += 1;
                            let row_id = record
                                .get("id")
                                .map(value_to_string)
                                .unwrap_or_default();
                            tracing::warn!(row_id = %row_id, error = %err, "failed to convert legacy span row");
                        }
                    }
                }
            }

            if !converted.is_empty() {
                let saved = conn
                    .transaction()
                    .map_err(|e| RunlensError::Store(format!("begin tx failed: {e}")))
                    .and_then(|tx| {
                        insert_all(&tx, &converted)?;
                        tx.commit()
                            .map_err(|e| RunlensError::Store(format!("commit failed: {e}")))
                    });
                match saved {
                    Ok(()) => migrated += converted.len(),
                    Err(err) => {
                        failed += converted.len();
                        tracing::warn!(error = %err, "failed to save migrated batch");
                    }
                }
            }

            offset += batch_size;
            if offset % 1_000 == 0 || offset >= total {
                tracing::info!(processed = offset.min(total), total, "migration progress");
            }
        }

        let table_rows = scalar_usize(&conn, &format!("SELECT COUNT(*) FROM {SPANS_TABLE}"))?;
        let count_mismatch = table_rows != migrated;
        if count_mismatch {
            tracing::warn!(
                table_rows,
                migrated,
                "canonical table row count does not match migrated count"
            );
        }

        conn.execute_batch(&format!("DROP TABLE {BACKUP_TABLE};"))
            .map_err(|e| RunlensError::Store(format!("failed to drop backup table: {e}")))?;

        tracing::info!(migrated, failed, "span table migration completed");
        Ok(MigrationReport {
            outcome: MigrationOutcome::Migrated,
            migrated,
            failed,
            table_rows,
            count_mismatch,
        })
    }

    /// Rename the backup table back into place, if it still exists. Once
    /// the backup has been dropped the migration is one-way.
    pub fn restore_legacy_spans(&self) -> Result<bool> {
        let conn = self.conn();
        if !table_exists(&conn, BACKUP_TABLE)? {
            tracing::warn!("backup table does not exist; cannot restore legacy layout");
            return Ok(false);
        }
        if table_exists(&conn, SPANS_TABLE)? {
            conn.execute_batch(&format!("DROP TABLE {SPANS_TABLE};"))
                .map_err(|e| RunlensError::Store(format!("failed to drop span table: {e}")))?;
        }
        conn.execute_batch(&format!("ALTER TABLE {BACKUP_TABLE} RENAME TO {SPANS_TABLE};"))
            .map_err(|e| RunlensError::Store(format!("failed to restore legacy table: {e}")))?;
        tracing::info!("restored legacy span table");
        Ok(true)
    }
}

fn record_from_row(row: &duckdb::Row<'_>, columns: &[String]) -> Map<String, Value> {
    let mut record = Map::new();
    for (idx, name) in columns.iter().enumerate() {
        let value = match row.get_ref(idx) {
            Ok(value_ref) => value_ref_to_json(value_ref),
            Err(_) => Value::Null,
        };
        record.insert(name.clone(), value);
    }
    record
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i64::from(i)),
        ValueRef::SmallInt(i) => Value::from(i64::from(i)),
        ValueRef::Int(i) => Value::from(i64::from(i)),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => Value::from(i as i64),
        ValueRef::UTinyInt(u) => Value::from(u64::from(u)),
        ValueRef::USmallInt(u) => Value::from(u64::from(u)),
        ValueRef::UInt(u) => Value::from(u64::from(u)),
        ValueRef::UBigInt(u) => Value::from(u),
        ValueRef::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        _ => Value::Null,
    }
}

/// Rebuild one canonical span from a legacy row. Accepts both truly old rows
/// (RFC3339 timestamps, enum-name status, flat legacy attributes) and rows
/// that are already canonical-shaped, detected by which representation each
/// field uses.
pub(crate) fn convert_legacy_row(record: &Map<String, Value>) -> Result<SpanData> {
    let attributes_raw = parse_json_or_object(record.get("attributes"));
    let wire_name = record_str(record, "name").unwrap_or_default();

    let translated = convert_legacy_attributes(&attributes_raw, &wire_name);
    let span_name = if translated.span_name.is_empty() {
        wire_name.clone()
    } else {
        translated.span_name
    };
    let attributes = translated.attributes;

    let start = legacy_nano(record, "start_time", "start_time_unix_nano")?;
    let end = legacy_nano(record, "end_time", "end_time_unix_nano")?;

    let latency = match record_f64(record, "latency_ms") {
        Some(ms) if ms > 0.0 => (ms * 1_000_000.0) as i64,
        _ => match record_f64(record, "latency_ns") {
            Some(ns) if ns > 0.0 => ns as i64,
            _ => latency_ns(&start, &end),
        },
    };

    let mut status = decode_legacy_status(record.get("status"));
    if let Some(message) = record_str(record, "status_message") {
        status.message = message;
    }

    let span_id = record_scalar_string(record, "id")
        .or_else(|| record_scalar_string(record, "span_id"))
        .or_else(|| legacy_attr_string(&attributes_raw, "span.id"))
        .or_else(|| legacy_attr_string(&attributes_raw, "spanId"))
        .ok_or_else(|| {
            RunlensError::Validation("cannot determine span id for legacy row".into())
        })?;

    let mut span = SpanData {
        trace_id: record_scalar_string(record, "trace_id").unwrap_or_default(),
        span_id,
        trace_state: record_str(record, "trace_state"),
        parent_span_id: record_scalar_string(record, "parent_span_id"),
        flags: record_f64(record, "flags").map(|f| f as u32),
        name: span_name,
        kind: record_f64(record, "kind").map(|k| k as i32).unwrap_or(0),
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        attributes,
        dropped_attributes_count: 0,
        events: decode_legacy_events(record.get("events")),
        dropped_events_count: 0,
        links: Vec::new(),
        dropped_links_count: 0,
        status,
        resource: legacy_resource(record),
        scope: legacy_scope(),
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

    // Very old layouts recorded the run only on the row itself.
    if span.conversation_id == UNKNOWN_CONVERSATION {
        if let Some(conversation_id) = record_scalar_string(record, "conversation_id") {
            span.conversation_id = conversation_id;
        }
    }

    Ok(span)
}

/// Attributes may arrive as a JSON string or a structured column, and their
/// keys may be stored flat (`project.run_id`) or already nested; unflatten
/// normalizes both layouts.
fn parse_json_or_object(value: Option<&Value>) -> Value {
    let parsed = match value {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok(),
        Some(Value::Object(obj)) => Some(Value::Object(obj.clone())),
        _ => None,
    };
    match parsed {
        Some(Value::Object(map)) => Value::Object(unflatten_object(map)),
        _ => Value::Object(Map::new()),
    }
}

fn legacy_nano(record: &Map<String, Value>, iso_key: &str, nano_key: &str) -> Result<String> {
    if let Some(iso) = record_str(record, iso_key) {
        return encode_unix_nano(&iso);
    }
    Ok(match record.get(nano_key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    })
}

fn decode_legacy_status(value: Option<&Value>) -> SpanStatus {
    match value {
        Some(Value::String(s)) => {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(s) {
                return object_status(&obj);
            }
            let code = match s.to_uppercase().as_str() {
                "OK" => 1,
                "ERROR" => 2,
                _ => 0,
            };
            SpanStatus {
                code,
                message: String::new(),
            }
        }
        Some(Value::Object(obj)) => object_status(obj),
        _ => SpanStatus::default(),
    }
}

fn object_status(obj: &Map<String, Value>) -> SpanStatus {
    match obj.get("code").and_then(Value::as_i64) {
        Some(code) => SpanStatus {
            code,
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        None => SpanStatus::default(),
    }
}

fn decode_legacy_events(value: Option<&Value>) -> Vec<SpanEvent> {
    let items = match value {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|event| SpanEvent {
            name: event
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            time: legacy_event_time(event),
            attributes: event
                .get("attributes")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
            dropped_attributes_count: event
                .get("dropped_attributes_count")
                .or_else(|| event.get("droppedAttributesCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        })
        .collect()
}

fn legacy_event_time(event: &Map<String, Value>) -> String {
    if let Some(iso) = event
        .get("timestamp")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return encode_unix_nano(iso).unwrap_or_else(|_| "0".to_string());
    }
    for key in ["time_unix_nano", "timeUnixNano", "time"] {
        match event.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    "0".to_string()
}

/// Legacy rows carried no resource record; reconstruct a minimal one from
/// the service keys embedded in the attributes.
fn legacy_resource(record: &Map<String, Value>) -> SpanResource {
    let attributes = parse_json_or_object(record.get("attributes"));
    let mut flat = Map::new();

    let service = get_nested(&attributes, "service.name")
        .filter(|v| is_truthy(v))
        .or_else(|| get_nested(&attributes, "project.service_name").filter(|v| is_truthy(v)));
    if let Some(value) = service {
        flat.insert("service.name".to_string(), value.clone());
    }
    for key in ["service.namespace", "service.version", "service.instance.id"] {
        if let Some(value) = get_nested(&attributes, key) {
            flat.insert(key.to_string(), value.clone());
        }
    }

    SpanResource {
        attributes: Value::Object(unflatten_object(flat)),
        schema_url: None,
    }
}

fn legacy_scope() -> SpanScope {
    SpanScope {
        name: "agentscope".to_string(),
        version: Some("1.0.7".to_string()),
        attributes: Value::Object(Map::new()),
        schema_url: None,
    }
}

fn legacy_attr_string(attributes: &Value, path: &str) -> Option<String> {
    get_nested(attributes, path)
        .filter(|v| is_truthy(v))
        .map(value_to_string)
}

fn record_str(record: &Map<String, Value>, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn record_scalar_string(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn record_f64(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}
