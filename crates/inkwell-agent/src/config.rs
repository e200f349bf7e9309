//! File and environment configuration.
//!
//! ```toml
//! [provider]
//! kind = "anthropic"
//! model = "claude-sonnet-4-20250514"
//! api_key_env = "ANTHROPIC_API_KEY"
//!
//! [agent]
//! max_iterations = 8
//! approval_mode = "write_only"
//!
//! [context]
//! history_window = 16
//! system_prompt = "You are an editor for fiction manuscripts."
//! ```
//!
//! Every section and field is optional.  Environment variables override
//! the file (see [`InkwellConfig::apply_env`]).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::llm::context::{MAX_HISTORY_WINDOW, MIN_HISTORY_WINDOW};
use crate::llm::provider::{ProviderConfig, ProviderKind};
use crate::settings::{AgenticSettings, ApprovalMode};
use crate::tools::BUILTIN_TOOLS;

/// Default system prompt for agent runs.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a writing assistant working inside a book \
authoring application. Use the available tools to read the manuscript before answering \
questions about it. Only change chapters or entities when the user asks you to.";

/// How conversation history is sent to providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Number of recent messages sent with each request.
    pub history_window: usize,
    /// System prompt; `None` uses [`DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            history_window: MAX_HISTORY_WINDOW,
            system_prompt: None,
        }
    }
}

impl ContextSettings {
    /// The history window clamped to the supported range.
    pub fn window(&self) -> usize {
        self.history_window
            .clamp(MIN_HISTORY_WINDOW, MAX_HISTORY_WINDOW)
    }

    /// The effective system prompt.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InkwellConfig {
    pub provider: ProviderConfig,
    pub agent: AgenticSettings,
    pub context: ContextSettings,
}

impl InkwellConfig {
    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = ?path, "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;
        let config = Self::from_toml(&content)?;

        info!(path = ?path, provider = %config.provider.kind, "configuration loaded from file");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to parse TOML config: {e}"),
        })
    }

    /// Serialize to TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to serialize config as TOML: {e}"),
        })
    }

    /// Apply overrides from the process environment.
    ///
    /// | Variable | Effect |
    /// |---|---|
    /// | `INKWELL_PROVIDER` | provider kind |
    /// | `INKWELL_MODEL` | model name |
    /// | `INKWELL_ENDPOINT` | base URL |
    /// | `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` | key for the matching provider, unless one is configured |
    /// | `INKWELL_MAX_ITERATIONS` | agent iteration bound |
    /// | `INKWELL_APPROVAL_MODE` | `none`, `write_only` or `all` |
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(kind) = get("INKWELL_PROVIDER") {
            self.provider.kind = ProviderKind::parse(&kind).ok_or_else(|| AgentError::ConfigError {
                reason: format!("INKWELL_PROVIDER: unknown provider `{kind}`"),
            })?;
        }
        if let Some(model) = get("INKWELL_MODEL") {
            self.provider.model = model;
        }
        if let Some(endpoint) = get("INKWELL_ENDPOINT") {
            self.provider.endpoint = Some(endpoint);
        }
        if self.provider.api_key.is_none()
            && let Some(var) = self.provider.kind.api_key_env()
            && let Some(key) = get(var)
        {
            self.provider.api_key = Some(key);
        }
        if let Some(n) = get("INKWELL_MAX_ITERATIONS") {
            self.agent.max_iterations = n.trim().parse().map_err(|_| AgentError::ConfigError {
                reason: format!("INKWELL_MAX_ITERATIONS: `{n}` is not a number"),
            })?;
        }
        if let Some(mode) = get("INKWELL_APPROVAL_MODE") {
            self.agent.approval_mode =
                ApprovalMode::parse(&mode).ok_or_else(|| AgentError::ConfigError {
                    reason: format!("INKWELL_APPROVAL_MODE: unknown mode `{mode}`"),
                })?;
        }
        Ok(())
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.agent.validate(&BUILTIN_TOOLS)?;
        if self.provider.timeout_secs == 0 {
            return Err(AgentError::ConfigError {
                reason: "provider.timeout_secs must be at least 1".into(),
            });
        }
        let window = self.context.history_window;
        if !(MIN_HISTORY_WINDOW..=MAX_HISTORY_WINDOW).contains(&window) {
            warn!(
                history_window = window,
                clamped = self.context.window(),
                "context.history_window out of range, clamping"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = InkwellConfig::default();
        assert_eq!(config.provider.kind, ProviderKind::Ollama);
        assert_eq!(config.provider.max_tokens, 4096);
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.approval_mode, ApprovalMode::WriteOnly);
        assert_eq!(config.agent.enabled_tools.len(), BUILTIN_TOOLS.len());
        assert_eq!(config.context.window(), 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inkwell.toml");
        std::fs::write(
            &path,
            r#"
[provider]
kind = "openai"
model = "gpt-4o"

[agent]
approval_mode = "all"
enabled_tools = ["get_book", "read_chapter"]

[context]
history_window = 4
"#,
        )
        .unwrap();

        let config = InkwellConfig::load(&path).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.timeout_secs, 120);
        assert_eq!(config.agent.approval_mode, ApprovalMode::All);
        assert_eq!(config.agent.enabled_tools, vec!["get_book", "read_chapter"]);
        assert_eq!(config.context.window(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = InkwellConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, InkwellConfig::default());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = InkwellConfig::from_toml("[agent\nmax_iterations = ").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn env_overrides() {
        let mut config = InkwellConfig::default();
        config
            .apply_overrides(env(&[
                ("INKWELL_PROVIDER", "anthropic"),
                ("INKWELL_MODEL", "claude-x"),
                ("ANTHROPIC_API_KEY", "sk-ant"),
                ("OPENAI_API_KEY", "sk-openai"),
                ("INKWELL_MAX_ITERATIONS", "3"),
                ("INKWELL_APPROVAL_MODE", "none"),
            ]))
            .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert_eq!(config.provider.model, "claude-x");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.agent.approval_mode, ApprovalMode::None);
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = InkwellConfig::default();
        assert!(config.apply_overrides(env(&[("INKWELL_MAX_ITERATIONS", "many")])).is_err());
        assert!(config.apply_overrides(env(&[("INKWELL_PROVIDER", "gemini")])).is_err());
    }

    #[test]
    fn validate_rejects_zero_iterations_and_unknown_tools() {
        let mut config = InkwellConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = InkwellConfig::default();
        config.agent.enabled_tools.push("summon_muse".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_keeps_settings() {
        let mut config = InkwellConfig::default();
        config.agent.approval_mode = ApprovalMode::All;
        let text = config.to_toml().unwrap();
        assert!(text.contains("approval_mode = \"all\""));
        assert_eq!(InkwellConfig::from_toml(&text).unwrap(), config);
    }
}
