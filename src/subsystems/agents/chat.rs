//! `chat` agent — retrieval-augmented single-turn answering with history.
//!
//! Each message is answered in one LLM round-trip: retrieve the best-scoring
//! chunks for the question, fold recent transcript entries in as history, and
//! render the layered prompt. The reply carries the retrieval hits as sources
//! and a confidence derived from whether anything matched.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::subsystems::agents::prompt::PromptBuilder;
use crate::subsystems::memory::docstore::SourceRef;
use crate::supervisor::bus::{BusPayload, BusResult};

use super::{Agent, AgentsState};

/// Confidence reported when retrieval produced at least one source.
const CONFIDENCE_WITH_SOURCES: f32 = 0.8;
/// Confidence reported when the answer is ungrounded.
const CONFIDENCE_WITHOUT_SOURCES: f32 = 0.3;

/// Fallback body when `config/prompts/chat.md` is missing.
const DEFAULT_CHAT_BODY: &str = "\
Answer the user's question using the document passages below. Quote or \
paraphrase the passages; do not invent details. If the passages are empty or \
unrelated, say you found no matching documents and answer from general \
knowledge, clearly marked as such.

Document passages:
{{context}}

Conversation so far:
{{history}}

Question: {{question}}";

pub struct ChatAgent;

impl Agent for ChatAgent {
    fn id(&self) -> &str {
        "chat"
    }

    fn handle(
        &self,
        action: String,
        channel_id: String,
        content: String,
        session_id: Option<String>,
        reply_tx: oneshot::Sender<BusResult>,
        state: Arc<AgentsState>,
    ) {
        if action == "health" {
            let _ = reply_tx.send(Ok(BusPayload::JsonResponse {
                data: serde_json::json!({ "agent_id": "chat", "status": "ok" }).to_string(),
            }));
            return;
        }

        tokio::spawn(async move {
            let result = answer(&state, &channel_id, &content, session_id).await;
            let _ = reply_tx.send(result);
        });
    }
}

async fn answer(
    state: &Arc<AgentsState>,
    channel_id: &str,
    content: &str,
    requested_session_id: Option<String>,
) -> BusResult {
    // Mint a session on first message; echo the id back so the channel can
    // thread follow-ups.
    let session_id =
        requested_session_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    // Retrieval — SQLite is synchronous, keep it off the async executor.
    let sources = {
        let memory = state.memory.clone();
        let retrieval = state.retrieval.clone();
        let query = content.to_string();
        tokio::task::spawn_blocking(move || memory.docstore().search(&query, &retrieval))
            .await
            .unwrap_or_else(|e| {
                Err(crate::error::AppError::Memory(format!("search task failed: {e}")))
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "chat: retrieval failed, answering without context");
                Vec::new()
            })
    };
    debug!(%session_id, hits = sources.len(), "chat: retrieval done");

    // History comes from entries before this message — read, then append.
    let history = read_history(state, &session_id).await;
    append_transcript(state, &session_id, "user", content).await;

    let prompt = PromptBuilder::new(&state.prompts_dir)
        .layer("id.md")
        .layer_or("chat.md", DEFAULT_CHAT_BODY)
        .var("context", format_context(&sources))
        .var("history", history)
        .var("question", content)
        .build();

    let completion = state.complete_via_llm(channel_id, &prompt, None).await?;

    append_transcript(state, &session_id, "assistant", &completion.text).await;

    let confidence = if sources.is_empty() {
        CONFIDENCE_WITHOUT_SOURCES
    } else {
        CONFIDENCE_WITH_SOURCES
    };

    Ok(BusPayload::ChatReply {
        channel_id: channel_id.to_string(),
        session_id,
        content: completion.text,
        sources,
        confidence,
    })
}

/// Render retrieval hits as numbered passages for the prompt.
fn format_context(sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        return "(no matching passages found)".to_string();
    }
    let mut out = String::new();
    for (i, s) in sources.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} (page {})\n{}\n\n",
            i + 1,
            s.document_title,
            s.page,
            s.snippet
        ));
    }
    out.trim_end().to_string()
}

async fn read_history(state: &Arc<AgentsState>, session_id: &str) -> String {
    let memory = state.memory.clone();
    let id = session_id.to_string();
    let window = state.history_window;
    let entries = tokio::task::spawn_blocking(move || memory.sessions().read_last(&id, window))
        .await
        .unwrap_or_else(|e| {
            Err(crate::error::AppError::Memory(format!("history task failed: {e}")))
        })
        .unwrap_or_else(|e| {
            warn!(error = %e, "chat: transcript read failed");
            Vec::new()
        });

    let mut out = String::new();
    for e in &entries {
        out.push_str(&format!("{}: {}\n", e.role, e.content));
    }
    if out.is_empty() {
        out.push_str("(no prior messages)");
    }
    out
}

async fn append_transcript(state: &Arc<AgentsState>, session_id: &str, role: &str, content: &str) {
    let memory = state.memory.clone();
    let id = session_id.to_string();
    let role = role.to_string();
    let content = content.to_string();
    let result =
        tokio::task::spawn_blocking(move || memory.sessions().append(&id, &role, &content)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "chat: transcript append failed"),
        Err(e) => warn!(error = %e, "chat: transcript append task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentsConfig, MemoryConfig, RetrievalConfig, ThinkingConfig};
    use crate::subsystems::agents::AgentsSubsystem;
    use crate::subsystems::memory::MemorySystem;
    use crate::supervisor::bus::{BusMessage, SupervisorBus};
    use crate::supervisor::dispatch::BusHandler;
    use tempfile::TempDir;

    fn wire_agents() -> (TempDir, TempDir, Arc<MemorySystem>, AgentsSubsystem, SupervisorBus) {
        let dir = TempDir::new().unwrap();
        let prompts = TempDir::new().unwrap();
        let memory = Arc::new(MemorySystem::new(dir.path(), &MemoryConfig::standard()).unwrap());
        let bus = SupervisorBus::new(16);
        let agents = AgentsSubsystem::new(
            AgentsConfig { default_agent: "chat".to_string() },
            RetrievalConfig::standard(),
            ThinkingConfig::standard(),
            &MemoryConfig::standard(),
            prompts.path().to_path_buf(),
            bus.handle.clone(),
            memory.clone(),
        );
        (dir, prompts, memory, agents, bus)
    }

    /// Fake LLM responder that captures prompts and echoes a fixed reply.
    fn spawn_capturing_llm(
        mut bus: SupervisorBus,
        prompt_tx: tokio::sync::mpsc::UnboundedSender<String>,
    ) {
        tokio::spawn(async move {
            while let Some(BusMessage::Request { payload, reply_tx, .. }) = bus.rx.recv().await {
                if let BusPayload::LlmRequest { content, .. } = payload {
                    let _ = prompt_tx.send(content);
                    let _ = reply_tx.send(Ok(BusPayload::LlmReply {
                        content: "the infield fly rule protects baserunners".to_string(),
                        usage: None,
                    }));
                }
            }
        });
    }

    #[tokio::test]
    async fn grounded_answer_carries_sources_and_high_confidence() {
        let (_dir, _prompts, memory, agents, bus) = wire_agents();
        let (prompt_tx, mut prompt_rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_capturing_llm(bus, prompt_tx);

        memory
            .ingest_document(
                "Rulebook",
                "unit",
                vec!["the infield fly rule protects baserunners from deliberate drops".to_string()],
                &RetrievalConfig::standard(),
            )
            .unwrap();

        let (tx, rx) = oneshot::channel();
        agents.handle_request(
            "agents/chat",
            BusPayload::ChatMessage {
                channel_id: "http0".to_string(),
                session_id: None,
                content: "infield fly rule".to_string(),
            },
            tx,
        );

        match rx.await.unwrap() {
            Ok(BusPayload::ChatReply { sources, confidence, .. }) => {
                assert!(!sources.is_empty());
                assert_eq!(sources[0].document_title, "Rulebook");
                assert!((confidence - 0.8).abs() < f32::EPSILON);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        // The prompt must contain the retrieved passage and the question.
        let prompt = prompt_rx.recv().await.unwrap();
        assert!(prompt.contains("infield fly rule"));
        assert!(prompt.contains("Rulebook"));
    }

    #[tokio::test]
    async fn ungrounded_answer_has_low_confidence() {
        let (_dir, _prompts, _memory, agents, bus) = wire_agents();
        let (prompt_tx, _prompt_rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_capturing_llm(bus, prompt_tx);

        let (tx, rx) = oneshot::channel();
        agents.handle_request(
            "agents/chat",
            BusPayload::ChatMessage {
                channel_id: "http0".to_string(),
                session_id: None,
                content: "unrelated question".to_string(),
            },
            tx,
        );

        match rx.await.unwrap() {
            Ok(BusPayload::ChatReply { sources, confidence, .. }) => {
                assert!(sources.is_empty());
                assert!((confidence - 0.3).abs() < f32::EPSILON);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_persists_turns_and_feeds_history() {
        let (_dir, _prompts, memory, agents, bus) = wire_agents();
        let (prompt_tx, mut prompt_rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_capturing_llm(bus, prompt_tx);

        let (tx, rx) = oneshot::channel();
        agents.handle_request(
            "agents/chat",
            BusPayload::ChatMessage {
                channel_id: "http0".to_string(),
                session_id: None,
                content: "first question".to_string(),
            },
            tx,
        );
        let session_id = match rx.await.unwrap() {
            Ok(BusPayload::ChatReply { session_id, .. }) => session_id,
            other => panic!("unexpected reply: {other:?}"),
        };
        let _ = prompt_rx.recv().await;

        // Both turns recorded.
        let entries = memory.sessions().read_last(&session_id, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, "user");
        assert_eq!(entries[1].role, "assistant");

        // Second message on the same session sees the first exchange.
        let (tx, rx) = oneshot::channel();
        agents.handle_request(
            "agents/chat",
            BusPayload::ChatMessage {
                channel_id: "http0".to_string(),
                session_id: Some(session_id.clone()),
                content: "follow-up".to_string(),
            },
            tx,
        );
        let reply_session = match rx.await.unwrap() {
            Ok(BusPayload::ChatReply { session_id, .. }) => session_id,
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_eq!(reply_session, session_id);

        let prompt = prompt_rx.recv().await.unwrap();
        assert!(prompt.contains("first question"));
    }

    #[tokio::test]
    async fn health_action_replies_without_llm() {
        let (_dir, _prompts, _memory, agents, bus) = wire_agents();
        drop(bus);

        let (tx, rx) = oneshot::channel();
        agents.handle_request(
            "agents/chat/health",
            BusPayload::ChatMessage {
                channel_id: "http0".to_string(),
                session_id: None,
                content: String::new(),
            },
            tx,
        );

        match rx.await.unwrap() {
            Ok(BusPayload::JsonResponse { data }) => {
                assert!(data.contains("chat"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn context_formatting_numbers_passages() {
        let sources = vec![SourceRef {
            doc_id: "d1".into(),
            document_title: "Handbook".into(),
            page: 3,
            snippet: "a passage".into(),
            score: 120,
            matched_term: "passage".into(),
        }];
        let ctx = format_context(&sources);
        assert!(ctx.starts_with("[1] Handbook (page 3)"));
        assert!(ctx.contains("a passage"));
        assert_eq!(format_context(&[]), "(no matching passages found)");
    }
}
