//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.
//! Errors raised by the Store Access boundary use [`StoreError`] and are
//! wrapped when they cross into the agent.

/// Unified error type for the agent core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Provider errors -----------------------------------------------------
    /// No API key is configured for a provider that requires one.  Raised
    /// before any network call is attempted.
    #[error("missing api key for provider: {provider}")]
    MissingCredentials { provider: String },

    /// The HTTP request could not be sent or the connection dropped.
    #[error("{provider} request failed: {reason}")]
    Transport { provider: String, reason: String },

    /// The backend answered with its own error envelope.
    #[error("{provider} returned an error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Backend {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// The response body could not be parsed into the expected format.
    #[error("response parse error: {reason}")]
    ParseFailed { reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced by the model does not exist in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Tool arguments did not match the tool's parameter schema.
    #[error("invalid arguments for `{tool_name}`: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    /// The Store Access collaborator failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // -- Runtime errors ------------------------------------------------------
    /// A run was requested while another one is still active.
    #[error("an agent run is already in progress")]
    RunInProgress,

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Short name of the error class, used when rendering user-visible
    /// error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials { .. } => "credential",
            Self::Transport { .. } => "transport",
            Self::Backend { .. } => "backend",
            Self::ParseFailed { .. } | Self::Json(_) => "malformed response",
            Self::UnknownTool { .. } => "unknown tool",
            Self::InvalidArguments { .. } => "invalid arguments",
            Self::Store(_) => "store",
            Self::RunInProgress => "busy",
            Self::ConfigError { .. } => "config",
            Self::Internal(_) => "internal",
        }
    }

    pub(crate) fn transport(provider: &str, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            provider: provider.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            provider: "http".into(),
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors reported by a Store Access implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("{kind} not found: {slug}")]
    NotFound { kind: &'static str, slug: String },

    /// A record with the same slug already exists.
    #[error("{kind} already exists: {slug}")]
    AlreadyExists { kind: &'static str, slug: String },

    /// The write was rejected by the data layer.
    #[error("invalid store operation: {0}")]
    Invalid(String),

    /// Reading or writing the backing file failed.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_includes_status_when_known() {
        let err = AgentError::Backend {
            provider: "openai".into(),
            status: Some(429),
            message: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "openai returned an error (429): rate limited");

        let err = AgentError::Backend {
            provider: "ollama".into(),
            status: None,
            message: "model not found".into(),
        };
        assert_eq!(err.to_string(), "ollama returned an error: model not found");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        let err = AgentError::MissingCredentials {
            provider: "anthropic".into(),
        };
        assert_eq!(err.kind(), "credential");
        assert_eq!(AgentError::transport("openai", "timeout").kind(), "transport");
        let store: AgentError = StoreError::NotFound {
            kind: "chapter",
            slug: "c".into(),
        }
        .into();
        assert_eq!(store.kind(), "store");
        assert_eq!(store.to_string(), "store error: chapter not found: c");
    }
}
