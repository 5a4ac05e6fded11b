//! Layered prompt builder for agents.
//!
//! Prompts are assembled from a stack of plain-text template fragments
//! stored under `config/prompts/`.  Each layer is appended in order; missing
//! files are silently skipped so layers can be optional.
//!
//! ## Layer ordering convention
//!
//! ```text
//! 0. id.md          — assistant identity / persona (who it is)
//! 1. <agent>.md     — agent-specific template with task variables
//! ```
//!
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, after all layers are joined.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const SEPARATOR: &str = "\n\n";

/// Fluent builder that assembles a layered prompt from template files.
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append a layer by loading `filename` from the prompts directory.
    /// Silently skips the layer when the file does not exist.
    pub fn layer(mut self, filename: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if !trimmed.is_empty() {
                    self.parts.push(trimmed);
                }
            }
            Err(_) => {
                tracing::debug!("prompt: layer '{}' not found — skipped", path.display());
            }
        }
        self
    }

    /// Append a layer by loading `filename`, falling back to `default` when
    /// the file is missing or empty. Agents use this for their body template
    /// so a bare deployment without a prompts directory still works.
    pub fn layer_or(mut self, filename: &str, default: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        let text = fs::read_to_string(&path).unwrap_or_else(|_| default.to_string());
        let trimmed = text.trim().to_string();
        let part = if trimmed.is_empty() { default.trim().to_string() } else { trimmed };
        if !part.is_empty() {
            self.parts.push(part);
        }
        self
    }

    /// Directly append a text fragment (e.g. an already-rendered section).
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim().to_string();
        if !trimmed.is_empty() {
            self.parts.push(trimmed);
        }
        self
    }

    /// Register a single `{{key}}` → value substitution applied at build time.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Assemble all layers, join with blank lines, and apply variable substitution.
    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            let placeholder = format!("{{{{{}}}}}", k);
            prompt = prompt.replace(&placeholder, v);
        }
        prompt
    }
}
