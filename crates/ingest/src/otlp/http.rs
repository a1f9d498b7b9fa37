//! HTTP trace receiver: `POST /v1/traces` accepting optionally compressed
//! binary or JSON envelopes.

use std::io::Read;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum::routing::post;
use flate2::read::{GzDecoder, ZlibDecoder};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::otlp::decode::Normalizer;
use crate::otlp::raw::RawResourceSpans;
use crate::pipeline::Pipeline;

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const PROTOBUF_CONTENT_TYPES: [&str; 4] = [
    "application/x-protobuf",
    "application/vnd.google.protobuf",
    "application/protobuf",
    "application/octet-stream",
];

#[derive(Clone)]
pub struct HttpIngestState {
    pub pipeline: Pipeline,
    pub normalizer: Normalizer,
}

pub fn router(pipeline: Pipeline, normalizer: Normalizer) -> Router {
    let state = HttpIngestState {
        pipeline,
        normalizer,
    };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/v1/traces", post(export_traces))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

async fn export_traces(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = header_str(&headers, CONTENT_TYPE.as_str()).to_ascii_lowercase();
    let content_encoding = header_str(&headers, CONTENT_ENCODING.as_str()).to_ascii_lowercase();
    tracing::debug!(
        content_type = %content_type,
        content_encoding = %content_encoding,
        content_length = body.len(),
        "received trace export request"
    );

    let is_json = content_type.contains("application/json");
    let is_protobuf = PROTOBUF_CONTENT_TYPES.iter().any(|t| content_type.contains(t));
    if !is_json && !is_protobuf {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Media Type",
            "Content-Type must be application/x-protobuf or application/json",
        );
    }

    if !content_encoding.is_empty() && !["gzip", "deflate"].contains(&content_encoding.as_str()) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Content Encoding",
            format!("Unsupported content encoding: {content_encoding}"),
        );
    }

    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Bad Request", "Empty request body");
    }

    let body = match decompress(&body, &content_encoding) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decompress request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "Bad Request",
                "Failed to decompress request body",
            );
        }
    };

    let groups = if is_protobuf {
        match ExportTraceServiceRequest::decode(body.as_slice()) {
            Ok(request) => request
                .resource_spans
                .into_iter()
                .map(RawResourceSpans::from)
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse protobuf trace payload");
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Unprocessable Entity",
                    "Failed to parse OpenTelemetry protobuf data",
                );
            }
        }
    } else {
        let payload: Value = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse json trace payload");
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Unprocessable Entity",
                    "Failed to parse JSON data",
                );
            }
        };
        let Some(items) = payload.get("resourceSpans").and_then(Value::as_array) else {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid or missing resourceSpans data",
                "Invalid OpenTelemetry data",
            );
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect::<Vec<RawResourceSpans>>()
    };

    let batch = match state.normalizer.batch_process(&groups) {
        Ok(batch) => batch,
        Err(err) => {
            tracing::error!(error = %err, "failed to process trace batch");
            return internal_error();
        }
    };
    if batch.skipped > 0 {
        tracing::debug!(skipped = batch.skipped, "skipped invalid spans in batch");
    }

    if let Err(err) = state.pipeline.submit_spans(batch.spans).await {
        tracing::error!(error = %err, "failed to persist trace batch");
        return internal_error();
    }

    (
        StatusCode::OK,
        Json(json!({"message": "Processed traces successfully"})),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn decompress(body: &[u8], encoding: &str) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        "gzip" => {
            GzDecoder::new(body).read_to_end(&mut out)?;
        }
        "deflate" => {
            ZlibDecoder::new(body).read_to_end(&mut out)?;
        }
        _ => out.extend_from_slice(body),
    }
    Ok(out)
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({"error": error, "message": message.into()})),
    )
        .into_response()
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        "Failed to process traces",
    )
}
