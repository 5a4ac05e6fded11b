//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the `-f` path), then applies
//! `SAMARA_WORK_DIR`, `SAMARA_LOG_LEVEL` and `SAMARA_HTTP_BIND` env
//! overrides. The LLM API key comes from `LLM_API_KEY` only — never TOML.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whether the HTTP channel is enabled.
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

/// Comms subsystem configuration.
#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub http: HttpConfig,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    /// Config for the OpenAI / OpenAI-compatible provider (`[llm.openai]`).
    pub openai: OpenAiConfig,
}

/// Agents subsystem configuration.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Agent that handles messages with no explicit routing (`default` in `[agents]`).
    pub default_agent: String,
}

/// Retrieval tuning (`[retrieval]`).
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters of overlap between adjacent chunks. Must be < `chunk_size`.
    pub chunk_overlap: usize,
    /// Maximum number of search results returned.
    pub top_k: usize,
    /// Minimum relevance score for a chunk to count as a hit.
    pub min_score: i64,
    /// Snippet window before the matched term, in characters.
    pub snippet_before: usize,
    /// Snippet window after the matched term, in characters.
    pub snippet_after: usize,
    /// keyword -> related search terms (`[retrieval.synonyms]`).
    pub synonyms: HashMap<String, Vec<String>>,
}

/// Sequential thinking tuning (`[thinking]`).
#[derive(Debug, Clone)]
pub struct ThinkingConfig {
    /// Cap on decomposition steps per session.
    pub max_steps: usize,
    /// Whether each reasoning step gets a validation pass.
    pub validate: bool,
}

/// Memory subsystem configuration (`[memory]`).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Max transcript entries per session before FIFO eviction.
    pub transcript_cap: Option<usize>,
    /// How many transcript entries the chat agent folds into its prompt.
    pub history_window: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    /// Working directory for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Directory holding prompt template layers.
    pub prompts_dir: PathBuf,
    pub comms: CommsConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub thinking: ThinkingConfig,
    pub memory: MemoryConfig,
    /// API key from `LLM_API_KEY` env var — `None` for keyless local models.
    pub llm_api_key: Option<String>,
}

// ── Raw TOML shapes — serde targets before resolution ─────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    service: RawService,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    agents: RawAgents,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    retrieval: RawRetrieval,
    #[serde(default)]
    thinking: RawThinking,
    #[serde(default)]
    memory: RawMemory,
}

#[derive(Deserialize)]
struct RawService {
    name: String,
    work_dir: String,
    log_level: String,
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawHttp {
    /// Defaults to `true`: the HTTP channel is the only channel.
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: true, bind: default_http_bind() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawAgents {
    #[serde(rename = "default", default = "default_agent_name")]
    default_agent: String,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self { default_agent: default_agent_name() }
    }
}

#[derive(Deserialize)]
struct RawRetrieval {
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_min_score")]
    min_score: i64,
    #[serde(default = "default_snippet_before")]
    snippet_before: usize,
    #[serde(default = "default_snippet_after")]
    snippet_after: usize,
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            snippet_before: default_snippet_before(),
            snippet_after: default_snippet_after(),
            synonyms: HashMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawThinking {
    #[serde(default = "default_max_steps")]
    max_steps: usize,
    #[serde(default = "default_true")]
    validate: bool,
}

impl Default for RawThinking {
    fn default() -> Self {
        Self { max_steps: default_max_steps(), validate: true }
    }
}

#[derive(Deserialize)]
struct RawMemory {
    transcript_cap: Option<usize>,
    #[serde(default = "default_history_window")]
    history_window: usize,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self { transcript_cap: None, history_window: default_history_window() }
    }
}

fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_agent_name() -> String { "chat".to_string() }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_http_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 200 }
fn default_top_k() -> usize { 5 }
fn default_min_score() -> i64 { 50 }
fn default_snippet_before() -> usize { 500 }
fn default_snippet_after() -> usize { 800 }
fn default_max_steps() -> usize { 8 }
fn default_history_window() -> usize { 12 }
fn default_true() -> bool { true }

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("SAMARA_WORK_DIR").ok();
    let log_level_override = env::var("SAMARA_LOG_LEVEL").ok();
    let bind_override = env::var("SAMARA_HTTP_BIND").ok();
    load_from(
        Path::new(path.unwrap_or("config/default.toml")),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
        bind_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
    bind_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if parsed.retrieval.chunk_overlap >= parsed.retrieval.chunk_size {
        return Err(AppError::Config(format!(
            "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
            parsed.retrieval.chunk_overlap, parsed.retrieval.chunk_size
        )));
    }

    let s = parsed.service;

    let work_dir_str = work_dir_override.unwrap_or(&s.work_dir).to_string();
    let work_dir = expand_home(&work_dir_str);
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();
    let bind = bind_override
        .unwrap_or(&parsed.comms.http.bind)
        .to_string();

    Ok(Config {
        service_name: s.name,
        work_dir,
        log_level,
        prompts_dir: PathBuf::from(s.prompts_dir),
        comms: CommsConfig {
            http: HttpConfig {
                enabled: parsed.comms.http.enabled,
                bind,
            },
        },
        agents: AgentsConfig {
            default_agent: parsed.agents.default_agent,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        retrieval: RetrievalConfig {
            chunk_size: parsed.retrieval.chunk_size,
            chunk_overlap: parsed.retrieval.chunk_overlap,
            top_k: parsed.retrieval.top_k,
            min_score: parsed.retrieval.min_score,
            snippet_before: parsed.retrieval.snippet_before,
            snippet_after: parsed.retrieval.snippet_after,
            synonyms: parsed.retrieval.synonyms,
        },
        thinking: ThinkingConfig {
            max_steps: parsed.thinking.max_steps,
            validate: parsed.thinking.validate,
        },
        memory: MemoryConfig {
            transcript_cap: parsed.memory.transcript_cap,
            history_window: parsed.memory.history_window,
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

impl RetrievalConfig {
    /// Defaults matching `config/default.toml` — used by tests and tools.
    pub fn standard() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            min_score: default_min_score(),
            snippet_before: default_snippet_before(),
            snippet_after: default_snippet_after(),
            synonyms: HashMap::new(),
        }
    }
}

impl ThinkingConfig {
    pub fn standard() -> Self {
        Self { max_steps: default_max_steps(), validate: true }
    }
}

impl MemoryConfig {
    pub fn standard() -> Self {
        Self { transcript_cap: None, history_window: default_history_window() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[service]
name = "test-bot"
work_dir = "~/.samara"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None, None).unwrap();
        assert_eq!(cfg.service_name, "test-bot");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.llm.provider, "dummy");
        assert_eq!(cfg.retrieval.chunk_size, 1000);
        assert_eq!(cfg.retrieval.chunk_overlap, 200);
        assert!(cfg.comms.http.enabled);
        // Missing [memory] section still gets a usable history window.
        assert_eq!(cfg.memory.history_window, 12);
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.samara");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".samara"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_work_dir_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), None, None).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
    }

    #[test]
    fn env_bind_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None, Some("0.0.0.0:9090")).unwrap();
        assert_eq!(cfg.comms.http.bind, "0.0.0.0:9090");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let toml = format!(
            "{MINIMAL_TOML}\n[retrieval]\nchunk_size = 100\nchunk_overlap = 100\n"
        );
        let f = write_toml(&toml);
        let result = load_from(f.path(), None, None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("chunk_overlap"));
    }

    #[test]
    fn synonyms_parse_into_map() {
        let toml = format!(
            "{MINIMAL_TOML}\n[retrieval.synonyms]\nregulation = [\"rule\", \"policy\"]\n"
        );
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), None, None, None).unwrap();
        assert_eq!(
            cfg.retrieval.synonyms.get("regulation").unwrap(),
            &vec!["rule".to_string(), "policy".to_string()]
        );
    }
}
