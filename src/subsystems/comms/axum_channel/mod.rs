//! Axum-based HTTP channel — the chat web UI and the `/api/` surface.
//!
//! ## URL layout
//!
//! ```text
//! GET  /                          → embedded chat page
//! POST /api/chat                  → retrieval-augmented chat turn
//! GET  /api/stats                 → document/chunk store statistics
//! GET  /api/documents             → ingested document listing
//! GET  /api/health                → liveness (cached health snapshot)
//! GET  /api/status                → readiness (uptime, components)
//! POST /api/upload-pdf            → ingest a PDF (multipart field `file`)
//! GET  /api/thinking/{session_id} → exported thinking-session JSON
//! GET  /favicon.ico               → 204
//! ```
//!
//! Every bus interaction is wrapped in `tokio::time::timeout` with a
//! per-route budget; the cancellation token is wired to axum's graceful
//! shutdown.

pub mod api;
mod ui;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;

use super::state::CommsState;

/// Axum router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone — all fields are reference-counted.
#[derive(Clone)]
pub struct AxumState {
    /// Channel identifier used in log spans.
    pub channel_id: Arc<str>,
    /// Comms subsystem capabilities (chat routing, store queries, health).
    pub comms: Arc<CommsState>,
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn run(
    channel_id: &str,
    bind_addr: &str,
    comms: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let state = AxumState { channel_id: Arc::from(channel_id), comms };
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("http bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "http channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("http server error: {e}")))?;

    info!(%channel_id, "http channel shut down");
    Ok(())
}

pub fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/api/chat", post(api::chat))
        .route("/api/stats", get(api::stats))
        .route("/api/documents", get(api::documents))
        .route("/api/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/upload-pdf", post(api::upload_pdf))
        .route("/api/thinking/{session_id}", get(api::thinking_export))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/", get(ui::chat_page))
        .with_state(state)
}
