//! The uniform provider contract and the adapter factory.
//!
//! Each backend implements [`LlmProvider`].  Adapters are immutable: a
//! configuration change builds a fresh adapter through [`build_provider`]
//! instead of mutating the one in use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::stream::EventSink;
use crate::llm::types::{CompletionRequest, CompletionResponse};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// The model requests go to unless overridden per request.
    fn model(&self) -> &str;

    /// Single round trip.
    ///
    /// # Errors
    ///
    /// [`AgentError::MissingCredentials`] before any network call when no
    /// key is configured, [`AgentError::Transport`] when the request could
    /// not be completed, [`AgentError::Backend`] when the backend answered
    /// with an error envelope.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Same semantics as [`complete`](Self::complete), delivered as stream
    /// events.  Exactly one terminal event (`done` or `error`) is delivered
    /// per call; failures are reported through that event.
    async fn stream_complete(&self, request: &CompletionRequest, on_event: EventSink<'_>);

    /// Best-effort reachability probe.  Never fails; `false` on any error.
    async fn test_connection(&self) -> bool;

    /// Available model names; empty when unsupported or unauthenticated.
    async fn list_models(&self) -> Vec<String> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default local-model endpoint.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Which backend an adapter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local model server (Ollama API).
    #[default]
    Ollama,
    /// OpenAI Chat Completions API (and compatible endpoints).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

impl ProviderKind {
    /// Provider name as used in logs and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Parse a provider name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Some(Self::Ollama),
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            _ => None,
        }
    }

    /// Base URL used when the configuration does not override it.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Ollama => OLLAMA_BASE_URL,
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Anthropic => ANTHROPIC_BASE_URL,
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1",
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Environment variable holding the API key for hosted backends.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which backend to talk to.
    pub kind: ProviderKind,
    /// Model identifier.  Empty selects the provider default.
    pub model: String,
    /// Base URL override.
    pub endpoint: Option<String>,
    /// API key.  Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable to read the API key from.
    pub api_key_env: Option<String>,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub temperature: Option<f32>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: String::new(),
            endpoint: None,
            api_key: None,
            api_key_env: None,
            max_tokens: 4096,
            temperature: None,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Configuration for a local model server.
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Ollama,
            model: model.into(),
            ..Self::default()
        }
    }

    /// Configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            model: model.into(),
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Configuration for the Anthropic API.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            model: model.into(),
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Point the configuration at a different base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The effective base URL, without a trailing slash.
    pub fn base_url(&self) -> String {
        self.endpoint
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.kind.default_endpoint())
            .trim_end_matches('/')
            .to_owned()
    }

    /// The effective model name.
    pub fn model_name(&self) -> String {
        if self.model.trim().is_empty() {
            self.kind.default_model().to_owned()
        } else {
            self.model.clone()
        }
    }

    /// Resolve the API key from the config or the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Some(key.to_owned());
        }
        let var = self.api_key_env.as_deref().or(self.kind.api_key_env())?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }
}

/// Build a new adapter for `config`.
///
/// # Errors
///
/// Returns [`AgentError::Transport`] when the HTTP client cannot be built.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
    };
    tracing::debug!(provider = provider.name(), model = provider.model(), "provider adapter built");
    Ok(provider)
}

// ---------------------------------------------------------------------------
// Shared HTTP helpers
// ---------------------------------------------------------------------------

/// Build the HTTP client used by an adapter.
pub(crate) fn http_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| AgentError::transport(provider, format!("failed to build HTTP client: {e}")))
}

/// Extract the human-readable message from a backend error envelope.
///
/// Understands `{"error": {"message": ...}}`, `{"error": "..."}` and a bare
/// `{"message": ...}`.
pub fn error_envelope_message(v: &Value) -> Option<String> {
    match v.get("error") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Object(obj)) => {
            let message = obj.get("message").and_then(Value::as_str).unwrap_or_default();
            let kind = obj.get("type").and_then(Value::as_str);
            return Some(match kind {
                Some(kind) if !message.is_empty() => format!("{kind}: {message}"),
                Some(kind) => kind.to_owned(),
                None => message.to_owned(),
            });
        }
        _ => {}
    }
    if v.get("type").and_then(Value::as_str) == Some("error") {
        return v.get("message").and_then(Value::as_str).map(String::from);
    }
    None
}

/// Turn a non-2xx response into a [`AgentError::Backend`].
pub(crate) async fn backend_error(provider: &str, response: reqwest::Response) -> AgentError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| error_envelope_message(&v))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_owned()
            } else {
                body
            }
        });
    tracing::warn!(provider, status = %status, message = %message, "backend returned an error");
    AgentError::Backend {
        provider: provider.to_owned(),
        status: Some(status.as_u16()),
        message,
    }
}

/// Read a JSON body, treating non-2xx statuses and 2xx bodies that carry
/// an error envelope as backend errors.
pub(crate) async fn read_json(provider: &str, response: reqwest::Response) -> Result<Value> {
    if !response.status().is_success() {
        return Err(backend_error(provider, response).await);
    }
    let text = response
        .text()
        .await
        .map_err(|e| AgentError::transport(provider, format!("failed to read response body: {e}")))?;
    let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::ParseFailed {
        reason: format!("invalid JSON response from {provider}: {e}"),
    })?;
    if let Some(message) = error_envelope_message(&v) {
        return Err(AgentError::Backend {
            provider: provider.to_owned(),
            status: None,
            message,
        });
    }
    Ok(v)
}

/// Map a send failure to a transport error.
pub(crate) fn send_error(provider: &str, url: &str, err: reqwest::Error) -> AgentError {
    let reason = if err.is_connect() {
        format!("{url} is not reachable: {err}")
    } else if err.is_timeout() {
        format!("request to {url} timed out")
    } else {
        err.to_string()
    };
    AgentError::transport(provider, reason)
}

/// Model names listed under `key` in a models-listing response, sorted.
pub(crate) fn model_names(v: &Value, list: &str, field: &str) -> Vec<String> {
    let mut names: Vec<String> = v[list]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m[field].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
