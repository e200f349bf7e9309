//! AI agent core for Inkwell.
//!
//! This crate implements the assistant behind the Inkwell authoring app: it
//! talks to language-model backends, normalizes their streamed output, and
//! runs a tool-calling loop over the book library with a human approval
//! gate in front of every write.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Orchestrator │────>│ ToolExecutor │────>│ StoreAccess  │
//! │  (run loop)  │     │  (validate)  │     │  (library)   │
//! └──────┬───────┘     └──────────────┘     └──────────────┘
//!        │       ▲
//!        │       └──── ApprovalGate (approve / reject / stop)
//!        │
//! ┌──────┴───────┐     ┌──────────────┐
//! │ LlmProvider  │────>│ Stream       │
//! │ ollama/openai│     │ normalizer   │
//! │ /anthropic   │     │ (6 events)   │
//! └──────────────┘     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Provider adapters, wire types, and stream normalization.
//! - [`tools`] -- Tool catalog, argument validation, and execution against a store.
//! - [`orchestrator`] -- The agent loop, run state, and events.
//! - [`approval`] -- The one-slot approval gate.
//! - [`execution`] -- Tool execution audit records.
//! - [`settings`] -- Per-run agent settings and approval policy.
//! - [`config`] -- File and environment configuration.
//! - [`error`] -- Agent error types.

pub mod approval;
pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod orchestrator;
pub mod settings;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use approval::{ApprovalDecision, ApprovalGate, PendingApproval};
pub use config::{ContextSettings, DEFAULT_SYSTEM_PROMPT, InkwellConfig};
pub use error::{AgentError, Result, StoreError};
pub use execution::{ExecutionStatus, ToolExecution};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Message, ParsedStreamEvent,
    ProviderConfig, ProviderKind, Role, ToolCall, ToolChoice, ToolResult, ToolSpec, Usage,
    build_provider,
};
pub use orchestrator::{AgentEvent, AgentOrchestrator, AgentStatus, RunOutcome, RunReport};
pub use settings::{AgenticSettings, ApprovalMode};
pub use tools::{
    BUILTIN_TOOLS, Book, Chapter, ChapterPatch, ChapterSummary, Entity, EntityPatch, EntitySummary, NewChapter,
    NewEntity, StoreAccess, StoreResult, ToolDefinition, ToolExecutor, ToolRegistry, slugify,
};
