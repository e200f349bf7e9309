//! Per-run agent settings.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tools::{BUILTIN_TOOLS, ToolDefinition};

/// Which tool calls must wait for a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Never ask.
    None,
    /// Ask for tools flagged `requires_approval`.
    #[default]
    WriteOnly,
    /// Ask for every call.
    All,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WriteOnly => "write_only",
            Self::All => "all",
        }
    }

    /// Parse a mode name; `-` and `_` are interchangeable.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "off" => Some(Self::None),
            "write_only" | "write" => Some(Self::WriteOnly),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Whether a call to `tool` has to be approved first.
    pub fn requires_approval(&self, tool: &ToolDefinition) -> bool {
        match self {
            Self::None => false,
            Self::WriteOnly => tool.requires_approval,
            Self::All => true,
        }
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one agent run.  Changes apply from the next run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgenticSettings {
    /// When false, prompts take the plain chat path without tools.
    pub enabled: bool,
    /// Upper bound on model round trips per run.
    pub max_iterations: u32,
    pub approval_mode: ApprovalMode,
    /// Tools offered to the model.
    pub enabled_tools: Vec<String>,
}

impl Default for AgenticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 10,
            approval_mode: ApprovalMode::default(),
            enabled_tools: BUILTIN_TOOLS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl AgenticSettings {
    /// Reject settings that can never produce a useful run.
    pub fn validate(&self, known_tools: &[&str]) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::ConfigError {
                reason: "agent.max_iterations must be at least 1".into(),
            });
        }
        let unknown: Vec<&str> = self
            .enabled_tools
            .iter()
            .map(String::as_str)
            .filter(|t| !known_tools.contains(t))
            .collect();
        if !unknown.is_empty() {
            return Err(AgentError::ConfigError {
                reason: format!("unknown tools in agent.enabled_tools: {}", unknown.join(", ")),
            });
        }
        Ok(())
    }
}
