//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives [`AxumState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Error bodies are uniform JSON:
//! `{"error": code, "message": ...}`.

use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::ingest::{pdf, title_from_filename};

use super::AxumState;

/// Per-route bus timeout budgets. The liveness routes read the cached
/// health snapshot directly and need none.
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ChatRequest {
    message: String,
    session_id: Option<String>,
    mode: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn json_body(data: String) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        data,
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /api/chat
pub(super) async fn chat(State(state): State<AxumState>, Json(req): Json<ChatRequest>) -> Response {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            json_error("invalid_request", "message must not be empty"),
        )
            .into_response();
    }

    let mode = req.mode.as_deref().unwrap_or("chat");
    if mode != "chat" && mode != "thinking" {
        return (
            StatusCode::BAD_REQUEST,
            json_error("invalid_request", format!("unknown mode: {mode}")),
        )
            .into_response();
    }

    let session_id = req.session_id.filter(|s| !s.trim().is_empty());
    let started = Instant::now();

    match tokio::time::timeout(
        CHAT_TIMEOUT,
        state
            .comms
            .send_chat(&state.channel_id, req.message, session_id, mode),
    )
    .await
    {
        Ok(Ok(outcome)) => {
            let body = json!({
                "response": outcome.reply,
                "session_id": outcome.session_id,
                "mode": mode,
                "sources": outcome.sources,
                "confidence": outcome.confidence,
                "processing_time": started.elapsed().as_secs_f64(),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "chat request failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "chat request timed out"),
        )
            .into_response(),
    }
}

/// GET /api/stats
pub(super) async fn stats(State(state): State<AxumState>) -> Response {
    match tokio::time::timeout(QUERY_TIMEOUT, state.comms.request_stats()).await {
        Ok(Ok(data)) => json_body(data),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "stats request failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "stats request timed out"),
        )
            .into_response(),
    }
}

/// GET /api/documents
pub(super) async fn documents(State(state): State<AxumState>) -> Response {
    match tokio::time::timeout(QUERY_TIMEOUT, state.comms.request_documents()).await {
        Ok(Ok(data)) => json_body(data),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "documents request failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "documents request timed out"),
        )
            .into_response(),
    }
}

/// GET /api/health — liveness from the cached health snapshot.
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let (all_healthy, subsystems) = state.comms.health_snapshot();
    let body = json!({
        "status": if all_healthy { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "subsystems": subsystems.iter().map(|h| json!({
            "id": h.id,
            "healthy": h.healthy,
            "message": h.message,
        })).collect::<Vec<_>>(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /api/status — readiness: uptime, version, per-component state.
pub(super) async fn status(State(state): State<AxumState>) -> Response {
    let (all_healthy, subsystems) = state.comms.health_snapshot();
    let mut components = serde_json::Map::new();
    for h in &subsystems {
        components.insert(
            h.id.clone(),
            json!(if h.healthy { "active" } else { "inactive" }),
        );
    }
    let body = json!({
        "status": if all_healthy { "healthy" } else { "degraded" },
        "uptime_seconds": state.comms.uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
        "components": components,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /api/upload-pdf — multipart field `file`, `.pdf` extension required.
pub(super) async fn upload_pdf(
    State(state): State<AxumState>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let filename = field.file_name().unwrap_or("upload.pdf").to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes.to_vec()));
                        break;
                    }
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            json_error("invalid_request", format!("failed to read upload: {e}")),
                        )
                            .into_response();
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    json_error("invalid_request", format!("malformed multipart body: {e}")),
                )
                    .into_response();
            }
        }
    }

    let Some((filename, bytes)) = upload else {
        return (
            StatusCode::BAD_REQUEST,
            json_error("invalid_request", "multipart field 'file' is required"),
        )
            .into_response();
    };

    if !filename.to_lowercase().ends_with(".pdf") {
        return (
            StatusCode::BAD_REQUEST,
            json_error("invalid_request", "only .pdf uploads are accepted"),
        )
            .into_response();
    }

    // PDF parsing is CPU-bound — keep it off the async executor.
    let pages = match tokio::task::spawn_blocking(move || pdf::extract_pages(&bytes)).await {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, %filename, "pdf extraction failed: {e}");
            return (StatusCode::BAD_REQUEST, json_error("invalid_pdf", e)).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json_error("internal", format!("extraction task failed: {e}")),
            )
                .into_response();
        }
    };

    let title = title_from_filename(&filename);
    let source = format!("upload:{filename}");

    match tokio::time::timeout(
        UPLOAD_TIMEOUT,
        state.comms.ingest_document(title, source, pages),
    )
    .await
    {
        Ok(Ok(summary_json)) => {
            info!(channel_id = %state.channel_id, %filename, "pdf ingested");
            // Wrap the ingest summary with the success flag.
            let mut body: serde_json::Value =
                serde_json::from_str(&summary_json).unwrap_or_else(|_| json!({}));
            if let Some(obj) = body.as_object_mut() {
                obj.insert("success".to_string(), json!(true));
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, %filename, "pdf ingest failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "ingest timed out"),
        )
            .into_response(),
    }
}

/// GET /api/thinking/{session_id} — exported session JSON, 404 when unknown.
pub(super) async fn thinking_export(
    State(state): State<AxumState>,
    Path(session_id): Path<String>,
) -> Response {
    match tokio::time::timeout(QUERY_TIMEOUT, state.comms.thinking_export(&session_id)).await {
        Ok(Ok(data)) => json_body(data),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, %session_id, "thinking export failed: {e}");
            (StatusCode::NOT_FOUND, json_error("not_found", e)).into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "thinking export timed out"),
        )
            .into_response(),
    }
}
