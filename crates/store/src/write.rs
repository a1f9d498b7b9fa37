use duckdb::{Connection, params};

use runlens_core::error::{Result, RunlensError};
use runlens_core::model::span::{SpanData, SpanEvent, SpanLink, SpanResource, SpanScope, SpanStatus};

use crate::Store;
use crate::schema::SPANS_TABLE;

const SPAN_COLUMNS: &str = "id, trace_id, span_id, trace_state, parent_span_id, flags, name, kind, \
     start_time_unix_nano, end_time_unix_nano, attributes, dropped_attributes_count, \
     events, dropped_events_count, links, dropped_links_count, status, resource, scope, \
     status_code, service_name, operation_name, instrumentation_name, instrumentation_version, \
     model, input_tokens, output_tokens, total_tokens, conversation_id, latency_ns";

impl Store {
    /// Upsert one batch. Identity is the span id, so re-delivered batches
    /// are idempotent.
    pub fn insert_spans(&self, spans: &[SpanData]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| RunlensError::Store(format!("begin tx failed: {e}")))?;
        insert_all(&tx, spans)?;
        tx.commit()
            .map_err(|e| RunlensError::Store(format!("commit spans failed: {e}")))
    }

    /// Bulk delete for cascading cleanup when a run is deleted upstream.
    pub fn delete_conversation_spans(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.conn();
        conn.execute(
            &format!("DELETE FROM {SPANS_TABLE} WHERE conversation_id = ?"),
            params![conversation_id],
        )
        .map_err(|e| RunlensError::Store(format!("delete spans failed: {e}")))
    }

    pub fn fetch_span(&self, span_id: &str) -> Result<Option<SpanData>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SPAN_COLUMNS} FROM {SPANS_TABLE} WHERE span_id = ?"
            ))
            .map_err(|e| RunlensError::Store(format!("prepare fetch failed: {e}")))?;
        let mut rows = stmt
            .query(params![span_id])
            .map_err(|e| RunlensError::Store(format!("fetch span failed: {e}")))?;

        match rows
            .next()
            .map_err(|e| RunlensError::Store(format!("fetch span failed: {e}")))?
        {
            Some(row) => Ok(Some(span_from_row(row)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn insert_all(conn: &Connection, spans: &[SpanData]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!(
            "INSERT OR REPLACE INTO {SPANS_TABLE} ({SPAN_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .map_err(|e| RunlensError::Store(format!("prepare insert spans failed: {e}")))?;

    for span in spans {
        stmt.execute(params![
            span.span_id,
            span.trace_id,
            span.span_id,
            span.trace_state,
            span.parent_span_id,
            span.flags,
            span.name,
            span.kind,
            span.start_time_unix_nano,
            span.end_time_unix_nano,
            to_json(&span.attributes)?,
            span.dropped_attributes_count,
            to_json(&span.events)?,
            span.dropped_events_count,
            to_json(&span.links)?,
            span.dropped_links_count,
            to_json(&span.status)?,
            to_json(&span.resource)?,
            to_json(&span.scope)?,
            span.status_code,
            span.service_name,
            span.operation_name,
            span.instrumentation_name,
            span.instrumentation_version,
            span.model,
            span.input_tokens,
            span.output_tokens,
            span.total_tokens,
            span.conversation_id,
            span.latency_ns,
        ])
        .map_err(|e| RunlensError::Store(format!("insert span failed: {e}")))?;
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| RunlensError::Internal(format!("span serialization failed: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| RunlensError::Store(format!("stored {what} is not valid json: {e}")))
}

fn span_from_row(row: &duckdb::Row<'_>) -> Result<SpanData> {
    let get_err = |e: duckdb::Error| RunlensError::Store(format!("read span row failed: {e}"));

    let attributes: String = row.get(10).map_err(get_err)?;
    let events: String = row.get(12).map_err(get_err)?;
    let links: String = row.get(14).map_err(get_err)?;
    let status: String = row.get(16).map_err(get_err)?;
    let resource: String = row.get(17).map_err(get_err)?;
    let scope: String = row.get(18).map_err(get_err)?;

    Ok(SpanData {
        trace_id: row.get(1).map_err(get_err)?,
        span_id: row.get(2).map_err(get_err)?,
        trace_state: row.get(3).map_err(get_err)?,
        parent_span_id: row.get(4).map_err(get_err)?,
        flags: row.get(5).map_err(get_err)?,
        name: row.get(6).map_err(get_err)?,
        kind: row.get(7).map_err(get_err)?,
        start_time_unix_nano: row.get(8).map_err(get_err)?,
        end_time_unix_nano: row.get(9).map_err(get_err)?,
        attributes: from_json(&attributes, "attributes")?,
        dropped_attributes_count: row.get::<_, Option<u32>>(11).map_err(get_err)?.unwrap_or(0),
        events: from_json::<Vec<SpanEvent>>(&events, "events")?,
        dropped_events_count: row.get::<_, Option<u32>>(13).map_err(get_err)?.unwrap_or(0),
        links: from_json::<Vec<SpanLink>>(&links, "links")?,
        dropped_links_count: row.get::<_, Option<u32>>(15).map_err(get_err)?.unwrap_or(0),
        status: from_json::<SpanStatus>(&status, "status")?,
        resource: from_json::<SpanResource>(&resource, "resource")?,
        scope: from_json::<SpanScope>(&scope, "scope")?,
        status_code: row.get::<_, Option<i64>>(19).map_err(get_err)?.unwrap_or(0),
        service_name: row.get(20).map_err(get_err)?,
        operation_name: row.get(21).map_err(get_err)?,
        instrumentation_name: row.get(22).map_err(get_err)?,
        instrumentation_version: row.get(23).map_err(get_err)?,
        model: row.get(24).map_err(get_err)?,
        input_tokens: row.get(25).map_err(get_err)?,
        output_tokens: row.get(26).map_err(get_err)?,
        total_tokens: row.get(27).map_err(get_err)?,
        conversation_id: row
            .get::<_, Option<String>>(28)
            .map_err(get_err)?
            .unwrap_or_default(),
        latency_ns: row.get(29).map_err(get_err)?,
    })
}
