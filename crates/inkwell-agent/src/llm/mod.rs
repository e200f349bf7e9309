//! LLM integration layer.
//!
//! This module provides the interface between the agent runtime and large
//! language model providers.  It is organized into:
//!
//! - [`types`] -- Core data types (messages, tool calls, requests, responses).
//! - [`events`] -- Normalized stream events and tool-call assembly.
//! - [`stream`] -- Line framing and the per-stream terminal guarantee.
//! - [`provider`] -- The [`LlmProvider`] trait, configuration, and factory.
//! - [`ollama`], [`openai`], [`anthropic`] -- Backend adapters.
//! - [`context`] -- Bounded conversation context for requests.

pub mod anthropic;
pub mod context;
pub mod events;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod stream;
pub mod types;

// Re-export the most commonly used types for convenience.
pub use anthropic::{AnthropicProvider, AnthropicStreamParser};
pub use context::{MAX_HISTORY_WINDOW, MIN_HISTORY_WINDOW, build_context, flatten_tool_turns};
pub use events::{ParsedStreamEvent, StreamCollector, ToolCallAssembler};
pub use ollama::{OllamaProvider, OllamaStreamParser};
pub use openai::{OpenAiProvider, OpenAiStreamParser};
pub use provider::{LlmProvider, ProviderConfig, ProviderKind, build_provider};
pub use stream::{EventSink, FrameParser, LineFramer, TerminalGuard, normalize_chunks};
pub use types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolCall, ToolChoice,
    ToolResult, ToolSpec, Usage,
};
