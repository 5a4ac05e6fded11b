//! Agents subsystem — receives agent-targeted requests and routes to agents.
//!
//! [`Agent`] is the extension trait: each agent is a `Send + Sync` struct
//! registered in the subsystem by name. Built-in agents are `chat`
//! (retrieval-augmented answering) and `thinking` (sequential multi-step
//! reasoning).
//!
//! [`AgentsSubsystem`] implements [`BusHandler`] with prefix `"agents"` and
//! is never blocked: agents spawn tasks and resolve `reply_tx` when done.

pub mod chat;
pub mod prompt;
pub mod thinking;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::{AgentsConfig, MemoryConfig, RetrievalConfig, ThinkingConfig};
use crate::llm::LlmUsage;
use crate::subsystems::memory::MemorySystem;
use crate::supervisor::bus::{
    BusError, BusHandle, BusPayload, BusResult, ERR_INTERNAL, ERR_METHOD_NOT_FOUND,
};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::{HealthDetail, HealthReporter, SubsystemHealth};

// ── AgentsState ───────────────────────────────────────────────────────────────

/// One completed LLM round-trip, as seen by agents.
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

/// Shared capability surface passed to agent plugins.
///
/// The raw [`BusHandle`] is private — agents call typed methods and cannot
/// address arbitrary bus targets.
pub struct AgentsState {
    /// Supervisor bus — private to this module.
    bus: BusHandle,
    /// Memory system — document retrieval and session transcripts.
    pub memory: Arc<MemorySystem>,
    /// Retrieval tuning forwarded to docstore searches.
    pub retrieval: RetrievalConfig,
    /// How many transcript entries the chat agent folds into its prompt.
    pub history_window: usize,
    /// Directory holding prompt template layers.
    pub prompts_dir: PathBuf,
}

impl AgentsState {
    /// Forward content to the LLM subsystem and return the completion.
    ///
    /// `system` is sent as the `"system"` role message before the user
    /// content when present.
    pub async fn complete_via_llm(
        &self,
        channel_id: &str,
        content: &str,
        system: Option<&str>,
    ) -> Result<LlmCompletion, BusError> {
        let reply = self
            .bus
            .request(
                "llm/complete",
                BusPayload::LlmRequest {
                    channel_id: channel_id.to_string(),
                    content: content.to_string(),
                    system: system.map(|s| s.to_string()),
                },
            )
            .await?;
        match reply {
            BusPayload::LlmReply { content, usage } => Ok(LlmCompletion { text: content, usage }),
            _ => Err(BusError::new(ERR_INTERNAL, "unexpected llm reply payload")),
        }
    }
}

// ── Agent trait ───────────────────────────────────────────────────────────────

/// An agent loaded by the agents subsystem.
///
/// Implementations must be `Send + Sync` and must not block the caller:
/// synchronous work resolves `reply_tx` immediately; async work spawns a task
/// and resolves it when done. Every agent answers the `health` action.
pub trait Agent: Send + Sync {
    /// Unique agent identifier (matches config name, e.g. `"chat"`).
    fn id(&self) -> &str;

    /// Handle an incoming request.
    fn handle(
        &self,
        action: String,
        channel_id: String,
        content: String,
        session_id: Option<String>,
        reply_tx: oneshot::Sender<BusResult>,
        state: Arc<AgentsState>,
    );
}

// ── AgentsSubsystem ───────────────────────────────────────────────────────────

/// Agents subsystem.
///
/// Method grammar:
/// - `agents`                         -> default agent, default action
/// - `agents/{agent_id}`              -> explicit agent, default action
/// - `agents/{agent_id}/{action}`     -> explicit agent + action
pub struct AgentsSubsystem {
    state: Arc<AgentsState>,
    agents: HashMap<String, Box<dyn Agent>>,
    default_agent: String,
    reporter: Option<HealthReporter>,
}

impl AgentsSubsystem {
    pub fn new(
        agents_cfg: AgentsConfig,
        retrieval: RetrievalConfig,
        thinking_cfg: ThinkingConfig,
        memory_cfg: &MemoryConfig,
        prompts_dir: PathBuf,
        bus: BusHandle,
        memory: Arc<MemorySystem>,
    ) -> Self {
        let default_agent = if agents_cfg.default_agent.is_empty() {
            "chat".to_string()
        } else {
            agents_cfg.default_agent
        };

        // Register built-in agents, keyed by Agent::id so the trait method is
        // the single source of truth for each agent's identity.
        let mut agents: HashMap<String, Box<dyn Agent>> = HashMap::new();
        let chat: Box<dyn Agent> = Box::new(chat::ChatAgent);
        agents.insert(chat.id().to_string(), chat);
        let thinking: Box<dyn Agent> = Box::new(thinking::ThinkingAgent::new(thinking_cfg));
        agents.insert(thinking.id().to_string(), thinking);

        Self {
            state: Arc::new(AgentsState {
                bus,
                memory,
                retrieval,
                history_window: memory_cfg.history_window,
                prompts_dir,
            }),
            agents,
            default_agent,
            reporter: None,
        }
    }

    /// Attach a health reporter and report initial healthy state.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        let mut agents: Vec<String> = self.agents.keys().cloned().collect();
        agents.sort();
        reporter.healthy_with(HealthDetail::Agents { agents });
        self.reporter = Some(reporter);
        self
    }

    fn resolve_agent<'a>(&'a self, method_agent_id: Option<&'a str>) -> Result<&'a str, BusError> {
        let agent_id = method_agent_id.unwrap_or(self.default_agent.as_str());
        if self.agents.contains_key(agent_id) {
            Ok(agent_id)
        } else {
            Err(BusError::new(
                ERR_METHOD_NOT_FOUND,
                format!("agent not found: {agent_id}"),
            ))
        }
    }
}

impl BusHandler for AgentsSubsystem {
    fn prefix(&self) -> &str {
        "agents"
    }

    /// Route a request. Ownership of `reply_tx` is forwarded to the agent —
    /// the supervisor loop returns immediately after this call.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        // Subsystem-level health must be intercepted before parse_method,
        // which would interpret "agents/health" as agent_id="health".
        if method == "agents/health" {
            let health = self
                .reporter
                .as_ref()
                .and_then(|r| r.current())
                .unwrap_or(SubsystemHealth {
                    id: "agents".to_string(),
                    healthy: true,
                    message: "ok".to_string(),
                    detail: None,
                });
            let data = serde_json::to_string(&health).unwrap_or_default();
            let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            return;
        }

        let (method_agent_id, action) = match parse_method(method) {
            Ok(v) => v,
            Err(e) => {
                let _ = reply_tx.send(Err(e));
                return;
            }
        };

        match payload {
            BusPayload::ChatMessage { channel_id, session_id, content } => {
                let agent_id = match self.resolve_agent(method_agent_id.as_deref()) {
                    Ok(id) => id,
                    Err(e) => {
                        let _ = reply_tx.send(Err(e));
                        return;
                    }
                };
                match self.agents.get(agent_id) {
                    Some(agent) => {
                        agent.handle(action, channel_id, content, session_id, reply_tx, self.state.clone())
                    }
                    None => {
                        let _ = reply_tx.send(Err(BusError::new(
                            ERR_METHOD_NOT_FOUND,
                            format!("agent not loaded: {agent_id}"),
                        )));
                    }
                }
            }
            _ => {
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("unsupported payload for method: {method}"),
                )));
            }
        }
    }
}

fn parse_method(method: &str) -> Result<(Option<String>, String), BusError> {
    let parts: Vec<&str> = method.split('/').collect();

    if parts.is_empty() || parts[0] != "agents" {
        return Err(BusError::new(
            ERR_METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        ));
    }

    match parts.len() {
        1 => Ok((None, "handle".to_string())),
        2 => Ok((Some(parts[1].to_string()), "handle".to_string())),
        3 => Ok((Some(parts[1].to_string()), parts[2].to_string())),
        _ => Err(BusError::new(
            ERR_METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )),
    }
}
