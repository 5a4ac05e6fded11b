//! Supervisor event bus — typed request channel between subsystems.
//!
//! Comms channels and subsystems talk to each other exclusively through
//! [`BusHandle::request`]: a method string (`"prefix/..."`), a typed
//! [`BusPayload`], and a oneshot reply slot. The supervisor loop owns the
//! receiver and routes by prefix (see [`super::run`]).

use tokio::sync::{mpsc, oneshot};

use crate::llm::LlmUsage;
use crate::subsystems::memory::docstore::SourceRef;

/// JSON-RPC-style error codes used on the bus.
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INTERNAL: i32 = -32000;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error returned by a subsystem over the bus.
#[derive(Debug, Clone)]
pub struct BusError {
    pub code: i32,
    pub message: String,
}

impl BusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Typed payloads carried by bus requests and replies.
#[derive(Debug)]
pub enum BusPayload {
    /// Inbound chat from a comms channel. For agent actions that take a
    /// plain argument (e.g. `thinking/export`), `content` carries it.
    ChatMessage {
        channel_id: String,
        session_id: Option<String>,
        content: String,
    },
    /// Chat reply with retrieval attribution.
    ChatReply {
        channel_id: String,
        session_id: String,
        content: String,
        sources: Vec<SourceRef>,
        confidence: f32,
    },
    /// One-shot LLM completion request.
    LlmRequest {
        channel_id: String,
        content: String,
        system: Option<String>,
    },
    /// LLM completion reply.
    LlmReply {
        content: String,
        usage: Option<LlmUsage>,
    },
    /// Document submitted for ingestion, already extracted to page texts.
    IngestDocument {
        title: String,
        source: String,
        pages: Vec<String>,
    },
    /// Pre-serialised JSON for query methods (stats, documents, exports).
    JsonResponse { data: String },
    /// Request payload for methods that take no arguments.
    Empty,
}

pub type BusResult = Result<BusPayload, BusError>;

// ── Messages & handles ────────────────────────────────────────────────────────

/// A routed request with a reply slot.
pub enum BusMessage {
    Request {
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
}

/// Cloneable sender half used by comms channels and subsystems.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Send a request and await the subsystem's reply.
    ///
    /// Transport failures (bus closed, reply dropped) surface as
    /// [`ERR_INTERNAL`] errors so callers handle one error type.
    pub async fn request(&self, method: &str, payload: BusPayload) -> BusResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Request {
                method: method.to_string(),
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| BusError::new(ERR_INTERNAL, "supervisor bus closed"))?;
        reply_rx
            .await
            .map_err(|_| BusError::new(ERR_INTERNAL, format!("no reply for method: {method}")))?
    }
}

/// Owns the supervisor-side channel ends.
pub struct SupervisorBus {
    /// Supervisor receives inbound messages here.
    pub rx: mpsc::Receiver<BusMessage>,
    /// Cloneable handle given to channels and subsystems.
    pub handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { rx, handle: BusHandle { tx } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display_includes_code() {
        let e = BusError::new(ERR_METHOD_NOT_FOUND, "method not found: nope");
        let s = e.to_string();
        assert!(s.contains("-32601"));
        assert!(s.contains("nope"));
    }

    #[tokio::test]
    async fn request_on_closed_bus_errors() {
        let bus = SupervisorBus::new(1);
        let handle = bus.handle.clone();
        drop(bus);
        let result = handle.request("agents", BusPayload::Empty).await;
        match result {
            Err(e) => assert_eq!(e.code, ERR_INTERNAL),
            Ok(_) => panic!("expected transport error"),
        }
    }

    #[tokio::test]
    async fn dropped_reply_surfaces_as_error() {
        let mut bus = SupervisorBus::new(1);
        let handle = bus.handle.clone();

        tokio::spawn(async move {
            // Receive the request and drop reply_tx without answering.
            let msg = bus.rx.recv().await.unwrap();
            let BusMessage::Request { reply_tx, .. } = msg;
            drop(reply_tx);
        });

        let result = handle.request("llm", BusPayload::Empty).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("no reply"));
    }
}
