//! Chat-completion client for OpenAI-compatible HTTP endpoints.
//!
//! Anything speaking `/v1/chat/completions` works: OpenAI itself, local
//! servers (Ollama, LM Studio, …), hosted alternatives. The JSON shapes live
//! in the private [`wire`] module and never leave this file — callers only
//! see [`LlmResponse`]. Prompt assembly and history folding happen at the
//! agent layer; this client is stateless, one round-trip per call.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, error, trace};

use crate::llm::{LlmResponse, ProviderError};

/// Reachability probes get a short budget regardless of the completion timeout.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models; when present it is sent
    /// as `Authorization: Bearer <key>` on every request. Cloning is cheap —
    /// `reqwest::Client` is an `Arc` internally.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    /// `true` for models that reject an explicit temperature (gpt-5 family).
    fn temperature_forbidden(&self) -> bool {
        self.model.starts_with("gpt-5")
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// HEAD the endpoint. Any HTTP status counts as reachable; only a
    /// transport failure (connection refused, timeout) does not.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.authorized(self.client.head(&self.api_base_url).timeout(PING_TIMEOUT))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    /// One completion round-trip: `content` as the user message, `system`
    /// (when present) as the system message before it.
    pub async fn complete(
        &self,
        content: &str,
        system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        let temperature = (!self.temperature_forbidden()).then_some(self.temperature);
        let body = wire::ChatRequest::build(&self.model, system, content, temperature);

        debug!(
            model = %self.model,
            temperature = ?temperature,
            content_len = content.len(),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&body)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let response = self
            .authorized(self.client.post(&self.api_base_url).json(&body))
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
                ProviderError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            let message = wire::error_message(status, &body);
            error!(%status, %message, "LLM request returned HTTP error");
            return Err(ProviderError::Request(message));
        }

        let reply: wire::ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = reply.choice_count(), "received LLM response");
        reply.into_response().map_err(ProviderError::Request)
    }
}

/// JSON shapes for the `/v1/chat/completions` wire format.
mod wire {
    use reqwest::StatusCode;
    use serde::{Deserialize, Serialize};

    use crate::llm::{LlmResponse, LlmUsage};

    #[derive(Debug, Serialize)]
    pub(super) struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    }

    #[derive(Debug, Serialize)]
    struct ChatMessage<'a> {
        role: &'static str,
        content: &'a str,
    }

    impl<'a> ChatRequest<'a> {
        /// Assemble the message list: optional system message first, then
        /// the user content. `temperature: None` omits the field entirely.
        pub(super) fn build(
            model: &'a str,
            system: Option<&'a str>,
            user: &'a str,
            temperature: Option<f32>,
        ) -> Self {
            let mut messages = Vec::with_capacity(2);
            if let Some(system) = system {
                messages.push(ChatMessage { role: "system", content: system });
            }
            messages.push(ChatMessage { role: "user", content: user });
            Self { model, messages, temperature }
        }
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ChatResponse {
        choices: Vec<Choice>,
        #[serde(default)]
        usage: Option<Usage>,
    }

    #[derive(Debug, Deserialize)]
    struct Choice {
        message: ReplyMessage,
    }

    #[derive(Debug, Deserialize)]
    struct ReplyMessage {
        #[serde(default)]
        content: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    }

    impl ChatResponse {
        pub(super) fn choice_count(&self) -> usize {
            self.choices.len()
        }

        /// First choice's trimmed text plus token usage. `Err` carries a
        /// description of what the reply was missing.
        pub(super) fn into_response(self) -> Result<LlmResponse, String> {
            let usage = self.usage.map(|u| LlmUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            });
            let text = self
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| "empty or missing content in response".to_string())?;
            Ok(LlmResponse { text, usage })
        }
    }

    /// Render an HTTP error status + body into one message, decoding the
    /// `{"error": {...}}` envelope OpenAI-style APIs return.
    pub(super) fn error_message(status: StatusCode, body: &str) -> String {
        #[derive(Deserialize)]
        struct Envelope {
            error: ErrorBody,
        }
        #[derive(Deserialize)]
        struct ErrorBody {
            message: String,
            #[serde(default)]
            code: Option<serde_json::Value>,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(env) => {
                let code = match env.error.code {
                    Some(serde_json::Value::String(s)) => format!(" [code={s}]"),
                    Some(other) => format!(" [code={other}]"),
                    None => String::new(),
                };
                format!("HTTP {status}{code}: {}", env.error.message)
            }
            Err(_) => format!("HTTP {status}: {body}"),
        }
    }
}
