//! LLM subsystem — routes `llm/*` bus requests to the configured provider.
//!
//! Implements [`BusHandler`] with prefix `"llm"` so the supervisor can
//! register it generically.  Each request is resolved in a spawned task;
//! the supervisor loop is never blocked on I/O.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError, providers};
use crate::supervisor::bus::{
    BusError, BusPayload, BusResult, ERR_INTERNAL, ERR_METHOD_NOT_FOUND,
};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::{HealthDetail, HealthReporter, SubsystemHealth};

/// Interval between background provider reachability checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct LlmSubsystem {
    provider: LlmProvider,
    model_name: String,
    reporter: Option<HealthReporter>,
}

impl LlmSubsystem {
    /// Construct the subsystem. `api_key` comes from `LLM_API_KEY` env — never TOML.
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let provider = providers::build(config, api_key)?;
        Ok(Self {
            provider,
            model_name: config.openai.model.clone(),
            reporter: None,
        })
    }

    /// Attach a health reporter to this subsystem.
    ///
    /// Call before registering with the supervisor.  The reporter is used by
    /// both the background checker and the `llm/health` bus handler.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Spawn a background task that probes the LLM provider endpoint
    /// periodically. Stops when `shutdown` is cancelled. No-op without a
    /// reporter.
    pub fn spawn_health_checker(&self, shutdown: CancellationToken) {
        let reporter = match &self.reporter {
            Some(r) => r.clone(),
            None => return,
        };
        let provider = self.provider.clone();
        let model = self.model_name.clone();
        tokio::spawn(async move {
            // Run an immediate check on startup.
            Self::run_check(&provider, &model, &reporter).await;
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            interval.tick().await; // consume the first (immediate) tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        Self::run_check(&provider, &model, &reporter).await;
                    }
                }
            }
        });
    }

    async fn run_check(provider: &LlmProvider, model: &str, reporter: &HealthReporter) {
        match provider.ping().await {
            Ok(()) => {
                debug!(model, "llm provider reachable");
                reporter.healthy_with(HealthDetail::Llm {
                    model: model.to_string(),
                    last_check: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                });
            }
            Err(e) => {
                warn!(model, error = %e, "llm provider unreachable");
                reporter.unhealthy(format!("provider unreachable: {e}"));
            }
        }
    }
}

impl BusHandler for LlmSubsystem {
    fn prefix(&self) -> &str {
        "llm"
    }

    /// Route an `llm/*` request. Ownership of `reply_tx` is moved into a
    /// spawned task — the supervisor loop returns immediately.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        // On-demand health check: runs a live ping and returns the updated state.
        if method == "llm/health" {
            let provider = self.provider.clone();
            let model = self.model_name.clone();
            let reporter = self.reporter.clone();
            tokio::spawn(async move {
                let health = match &reporter {
                    Some(r) => {
                        Self::run_check(&provider, &model, r).await;
                        r.current()
                    }
                    None => None,
                }
                .unwrap_or(SubsystemHealth {
                    id: "llm".to_string(),
                    healthy: true,
                    message: "ok".to_string(),
                    detail: None,
                });
                let data = serde_json::to_string(&health).unwrap_or_default();
                let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
            });
            return;
        }

        match payload {
            BusPayload::LlmRequest { channel_id, content, system } => {
                let provider = self.provider.clone();
                debug!(%method, %channel_id, "dispatching to llm provider");
                tokio::spawn(async move {
                    let result = provider
                        .complete(&content, system.as_deref())
                        .await
                        .map(|resp| {
                            if let Some(u) = &resp.usage {
                                debug!(
                                    input_tokens = u.input_tokens,
                                    output_tokens = u.output_tokens,
                                    "llm usage"
                                );
                            }
                            BusPayload::LlmReply {
                                content: resp.text,
                                usage: resp.usage,
                            }
                        })
                        .map_err(|e| BusError::new(ERR_INTERNAL, e.to_string()));
                    let _ = reply_tx.send(result);
                });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenAiConfig;

    fn dummy_subsystem() -> LlmSubsystem {
        let config = LlmConfig {
            provider: "dummy".into(),
            openai: OpenAiConfig {
                api_base_url: "http://localhost:0/v1/chat/completions".into(),
                model: "test-model".into(),
                temperature: 0.0,
                timeout_seconds: 1,
            },
        };
        LlmSubsystem::new(&config, None).unwrap()
    }

    #[tokio::test]
    async fn completes_via_dummy_provider() {
        let subsystem = dummy_subsystem();
        let (tx, rx) = oneshot::channel();

        subsystem.handle_request(
            "llm",
            BusPayload::LlmRequest {
                channel_id: "test0".into(),
                content: "hello".into(),
                system: None,
            },
            tx,
        );

        match rx.await.expect("reply") {
            Ok(BusPayload::LlmReply { content, usage }) => {
                assert_eq!(content, "[echo] hello");
                assert!(usage.is_none());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_health_replies_json_with_model_detail() {
        use crate::supervisor::health::HealthRegistry;

        let registry = HealthRegistry::new();
        let subsystem = dummy_subsystem().with_health_reporter(registry.reporter("llm"));
        let (tx, rx) = oneshot::channel();

        subsystem.handle_request("llm/health", BusPayload::Empty, tx);

        match rx.await.expect("reply") {
            Ok(BusPayload::JsonResponse { data }) => {
                let h: SubsystemHealth = serde_json::from_str(&data).unwrap();
                assert_eq!(h.id, "llm");
                assert!(h.healthy);
                match h.detail {
                    Some(HealthDetail::Llm { model, .. }) => assert_eq!(model, "test-model"),
                    other => panic!("expected llm detail, got {other:?}"),
                }
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_payload_is_rejected() {
        let subsystem = dummy_subsystem();
        let (tx, rx) = oneshot::channel();

        subsystem.handle_request("llm", BusPayload::Empty, tx);

        let err = rx.await.expect("reply").unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }
}
