//! Core types for LLM interaction.
//!
//! These types model the data flowing between the agent orchestrator and the
//! provider adapters.  They are provider-agnostic at this layer; each adapter
//! translates them into its own wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// System-level instructions that shape model behavior.
    System,
    /// Result of a tool invocation, fed back to the model.
    ToolResult,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// For [`Role::ToolResult`] messages this mirrors the tool result
    /// content.  For assistant messages that only carry tool calls this may
    /// be empty.
    #[serde(default)]
    pub content: String,

    /// When the message was appended to the conversation.
    pub timestamp: DateTime<Utc>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// The tool result carried by a [`Role::ToolResult`] message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    /// Marks assistant messages that report a failed run rather than model
    /// output.  These are shown to the user but never sent to a provider.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_result: None,
            is_error: false,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message with attached tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create an assistant message reporting a failed run.
    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            tool_result: Some(result.clone()),
            ..Self::new(Role::ToolResult, result.content)
        }
    }

    /// The id of the tool call this message answers, if any.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.tool_call_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the provider (or synthesized when the backend
    /// does not assign one).  Stable across the whole start/delta/end
    /// sequence of a streamed call.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as a JSON object.
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A fresh call id for backends that omit one.
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::now_v7().simple())
}

/// An empty JSON object, the fallback for missing or unparseable arguments.
pub fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

/// The result of executing (or rejecting) a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result corresponds to.
    pub tool_call_id: String,

    /// Result text fed back to the model.
    pub content: String,

    /// Whether the tool invocation failed or was rejected.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// A failed result.
    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Hint telling the model whether (and which) tools to call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// The model must not call tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call the named tool.
    Tool(String),
}

/// A tool definition as presented to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub parameters: Value,
}

/// A single completion request sent to a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// New user text for this turn.  Empty when the model should continue
    /// from the transcript alone.
    pub prompt: String,

    /// Optional system prompt.
    pub system_prompt: Option<String>,

    /// Bounded conversation history preceding `prompt`.
    pub history: Vec<Message>,

    /// Tools the model may call.  Empty disables tool use.
    pub tools: Vec<ToolSpec>,

    /// Optional tool-choice hint.
    pub tool_choice: Option<ToolChoice>,

    /// Overrides the adapter's configured model when set.
    pub model: Option<String>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate in this turn.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a request carrying only a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Whether the request needs a conversational endpoint (history or
    /// tools present) rather than a bare prompt completion.
    pub fn is_conversational(&self) -> bool {
        !self.history.is_empty() || !self.tools.is_empty()
    }

    /// Whether tools should be sent to the backend.
    pub fn sends_tools(&self) -> bool {
        !self.tools.is_empty() && self.tool_choice != Some(ToolChoice::None)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Why the model stopped generating, normalized across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the answer.
    #[default]
    Stop,
    /// The token limit was reached.
    Length,
    /// The backend aborted generation.
    Error,
    /// The model wants tool results before continuing.
    ToolUse,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::Error => "error",
            Self::ToolUse => "tool_use",
        };
        f.write_str(s)
    }
}

/// Token usage information returned by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input (prompt).
    pub input_tokens: u32,
    /// Number of tokens generated by the model.
    pub output_tokens: u32,
}

/// The full response to a non-streaming completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    /// Concatenated text output.
    pub content: String,

    /// The model that answered.
    pub model: String,

    /// Tool calls in the order the backend returned them.
    pub tool_calls: Vec<ToolCall>,

    /// Normalized finish reason.
    pub finish_reason: FinishReason,

    /// Token usage, when reported.
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Whether the response carries any text.
    pub fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }
}
