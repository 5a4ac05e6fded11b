//! Shared state for the comms subsystem — capability boundary for channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below. The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods or supervisor internals. The health registry rides
//! along so liveness endpoints read cached snapshots without a bus
//! round-trip.

use std::time::Instant;

use crate::error::AppError;
use crate::subsystems::memory::docstore::SourceRef;
use crate::supervisor::bus::{BusHandle, BusPayload};
use crate::supervisor::health::{HealthRegistry, SubsystemHealth};

/// A chat reply as surfaced to channels.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub reply: String,
    pub session_id: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

/// Shared state passed as `Arc<CommsState>` to every channel task.
pub struct CommsState {
    /// Supervisor bus — private so channels can't call arbitrary methods.
    bus: BusHandle,
    health: HealthRegistry,
    started_at: Instant,
}

impl CommsState {
    pub fn new(bus: BusHandle, health: HealthRegistry) -> Self {
        Self { bus, health, started_at: Instant::now() }
    }

    /// Send a chat message to the agents subsystem and await the reply.
    ///
    /// `mode` selects the agent: `"chat"` (default) or `"thinking"`.
    pub async fn send_chat(
        &self,
        channel_id: &str,
        content: String,
        session_id: Option<String>,
        mode: &str,
    ) -> Result<ChatOutcome, AppError> {
        let method = match mode {
            "thinking" => "agents/thinking",
            _ => "agents/chat",
        };
        let payload = BusPayload::ChatMessage {
            channel_id: channel_id.to_string(),
            session_id,
            content,
        };

        match self.bus.request(method, payload).await {
            Err(e) => Err(AppError::Comms(format!("agent error {}: {}", e.code, e.message))),
            Ok(BusPayload::ChatReply { session_id, content, sources, confidence, .. }) => {
                Ok(ChatOutcome { reply: content, session_id, sources, confidence })
            }
            Ok(_) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Store statistics JSON for `/api/stats`.
    pub async fn request_stats(&self) -> Result<String, AppError> {
        self.request_json("memory/stats").await
    }

    /// Document listing JSON for `/api/documents`.
    pub async fn request_documents(&self) -> Result<String, AppError> {
        self.request_json("memory/documents").await
    }

    /// Index an already-extracted document; returns the ingest summary JSON.
    pub async fn ingest_document(
        &self,
        title: String,
        source: String,
        pages: Vec<String>,
    ) -> Result<String, AppError> {
        let payload = BusPayload::IngestDocument { title, source, pages };
        match self.bus.request("memory/ingest", payload).await {
            Err(e) => Err(AppError::Comms(format!("memory error {}: {}", e.code, e.message))),
            Ok(BusPayload::JsonResponse { data }) => Ok(data),
            Ok(_) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Exported thinking-session JSON. Errors when the id is unknown.
    pub async fn thinking_export(&self, session_id: &str) -> Result<String, AppError> {
        let payload = BusPayload::ChatMessage {
            channel_id: String::new(),
            session_id: None,
            content: session_id.to_string(),
        };
        match self.bus.request("agents/thinking/export", payload).await {
            Err(e) => Err(AppError::Comms(format!("agent error {}: {}", e.code, e.message))),
            Ok(BusPayload::JsonResponse { data }) => Ok(data),
            Ok(_) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Cached health snapshot: overall healthy flag + per-subsystem states.
    pub fn health_snapshot(&self) -> (bool, Vec<SubsystemHealth>) {
        (self.health.all_healthy(), self.health.snapshot())
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    async fn request_json(&self, method: &str) -> Result<String, AppError> {
        match self.bus.request(method, BusPayload::Empty).await {
            Err(e) => Err(AppError::Comms(format!("memory error {}: {}", e.code, e.message))),
            Ok(BusPayload::JsonResponse { data }) => Ok(data),
            Ok(_) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }
}
