//! Anthropic Messages API adapter.
//!
//! The system prompt travels as a top-level field, tool results are
//! `tool_result` blocks inside a user message, and streaming uses SSE with
//! an `event:` line preceding each `data:` line.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::context::flatten_tool_turns;
use crate::llm::events::{ParsedStreamEvent, ToolCallAssembler};
use crate::llm::provider::{
    LlmProvider, ProviderConfig, backend_error, error_envelope_message, http_client, model_names,
    read_json, send_error,
};
use crate::llm::stream::{EventSink, FrameParser, TerminalGuard, pump_response};
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolCall, ToolChoice,
    ToolSpec, Usage, new_call_id,
};

const PROVIDER: &str = "anthropic";

/// Stands in for the user turn that fell outside the history window.
const EARLIER_CONVERSATION: &str = "(earlier conversation omitted)";

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl AnthropicProvider {
    /// Create an adapter from its configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url(),
            model: config.model_name(),
            api_key: config.resolved_api_key(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http: http_client(PROVIDER, config.timeout_secs)?,
        })
    }

    /// Build the JSON body for the Messages API.
    pub fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let flattened;
        let history = if request.tools.is_empty() {
            flattened = flatten_tool_turns(&request.history);
            &flattened
        } else {
            &request.history
        };
        let (history_system, mut messages) = messages_to_anthropic(history);
        if !request.prompt.is_empty() {
            messages.push(json!({"role": "user", "content": request.prompt}));
        }
        // The Messages API requires the first turn to come from the user.
        if messages.first().is_some_and(|m| m["role"] != "user") {
            messages.insert(0, json!({"role": "user", "content": EARLIER_CONVERSATION}));
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": messages,
        });

        let system = match (request.system_prompt.as_deref(), history_system) {
            (Some(s), Some(h)) if !s.is_empty() => Some(format!("{s}\n{h}")),
            (Some(s), None) if !s.is_empty() => Some(s.to_owned()),
            (_, h) => h,
        };
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_anthropic(&request.tools);
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = tool_choice_to_anthropic(choice);
            }
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    fn headers(&self) -> Result<HeaderMap> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::MissingCredentials {
                provider: PROVIDER.into(),
            })?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|e| AgentError::MissingCredentials {
                provider: format!("{PROVIDER} (invalid api key header: {e})"),
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let headers = self.headers()?;
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(url = %url, model = %body["model"], provider = PROVIDER, "sending LLM request");
        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, &url, e))
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let headers = self.headers()?;
        let url = format!("{}/v1/models", self.base_url);
        let resp = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, &url, e))?;
        let v = read_json(PROVIDER, resp).await?;
        Ok(model_names(&v, "data", "id"))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request_body(request, false);
        let resp = self.send(&body).await?;
        let v = read_json(PROVIDER, resp).await?;
        parse_response(&v)
    }

    async fn stream_complete(&self, request: &CompletionRequest, on_event: EventSink<'_>) {
        let mut guard = TerminalGuard::new(on_event);
        let body = self.build_request_body(request, true);
        match self.send(&body).await {
            Ok(resp) if resp.status().is_success() => {
                pump_response(resp, AnthropicStreamParser::new(), &mut guard).await;
            }
            Ok(resp) => {
                let err = backend_error(PROVIDER, resp).await;
                guard.fail(err.to_string());
            }
            Err(e) => guard.fail(e.to_string()),
        }
        guard.close();
    }

    async fn test_connection(&self) -> bool {
        match self.fetch_models().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(provider = PROVIDER, error = %e, "connection test failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<String> {
        self.fetch_models().await.unwrap_or_default()
    }
}

// ===========================================================================
// Format conversion (free functions)
// ===========================================================================

/// Convert internal messages to the Anthropic wire format.
///
/// Returns the system prompt (if any) separately because Anthropic places
/// it at the top level.  Consecutive tool results are merged into a single
/// user message so user/assistant turns keep alternating.
pub fn messages_to_anthropic(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());
    let mut last_was_tool_result = false;

    for msg in messages {
        let is_tool_result = msg.role == Role::ToolResult;
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => {
                wire_messages.push(json!({"role": "user", "content": msg.content}));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({"type": "text", "text": msg.content}));
                    }
                    for tc in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire_messages.push(json!({"role": "assistant", "content": content}));
                }
            }
            Role::ToolResult => {
                let Some(result) = &msg.tool_result else {
                    continue;
                };
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": result.tool_call_id,
                    "content": result.content,
                    "is_error": result.is_error,
                });
                match wire_messages.last_mut() {
                    Some(last) if last_was_tool_result => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => wire_messages.push(json!({"role": "user", "content": [block]})),
                }
            }
        }
        last_was_tool_result = is_tool_result;
    }

    (system, wire_messages)
}

/// Convert tool definitions into the Anthropic API format.
pub fn tools_to_anthropic(tools: &[ToolSpec]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect();
    json!(tool_values)
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

/// Map an Anthropic `stop_reason`.
pub fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolUse,
        Some("refusal") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

/// Parse a non-streaming Messages API response.
pub fn parse_response(v: &Value) -> Result<CompletionResponse> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| AgentError::ParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content {
        match block["type"].as_str().unwrap_or_default() {
            "text" => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text);
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: block["id"]
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map_or_else(new_call_id, str::to_owned),
                name: block["name"].as_str().unwrap_or_default().to_owned(),
                arguments: if block["input"].is_object() {
                    block["input"].clone()
                } else {
                    crate::llm::types::empty_arguments()
                },
            }),
            other => tracing::trace!(block_type = other, "ignoring content block"),
        }
    }

    let usage = v.get("usage").filter(|u| u.is_object()).map(|u| Usage {
        input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(CompletionResponse {
        content: text_parts.join(""),
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        finish_reason: map_stop_reason(v["stop_reason"].as_str()),
        tool_calls,
        usage,
    })
}

// ---------------------------------------------------------------------------
// Stream normalizer
// ---------------------------------------------------------------------------

/// Normalizes an Anthropic SSE stream.
///
/// The `event:` line is stashed and paired with the following `data:` line;
/// when a server omits it, the payload's own `type` field is used.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    current_event_type: Option<String>,
    calls: ToolCallAssembler,
    stop_reason: Option<String>,
    usage: Usage,
    saw_usage: bool,
}

impl AnthropicStreamParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self, event_type: &str, v: &Value, out: &mut Vec<ParsedStreamEvent>) {
        let index = v["index"].as_u64().unwrap_or(0) as usize;
        match event_type {
            "message_start" => {
                if let Some(input) = v["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = input as u32;
                    self.saw_usage = true;
                }
            }
            "content_block_start" => {
                let block = &v["content_block"];
                match block["type"].as_str().unwrap_or_default() {
                    "tool_use" => {
                        self.calls
                            .fragment(index, block["id"].as_str(), block["name"].as_str(), None, out);
                    }
                    "text" => {
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            out.push(ParsedStreamEvent::Text(text.to_owned()));
                        }
                    }
                    other => tracing::trace!(block_type = other, "ignoring content block"),
                }
            }
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            out.push(ParsedStreamEvent::Text(text.to_owned()));
                        }
                    }
                    "input_json_delta" => {
                        self.calls
                            .fragment(index, None, None, delta["partial_json"].as_str(), out);
                    }
                    other => tracing::trace!(delta_type = other, "ignoring delta type"),
                }
            }
            "content_block_stop" => self.calls.end(index, out),
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_owned());
                }
                if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output as u32;
                    self.saw_usage = true;
                }
            }
            "message_stop" => {
                self.calls.finish(out);
                let mut finish_reason = map_stop_reason(self.stop_reason.as_deref());
                if !self.calls.is_empty() && finish_reason == FinishReason::Stop {
                    finish_reason = FinishReason::ToolUse;
                }
                out.push(ParsedStreamEvent::Done {
                    finish_reason,
                    usage: self.saw_usage.then_some(self.usage),
                });
            }
            "error" => {
                let message = error_envelope_message(v).unwrap_or_else(|| "unknown stream error".into());
                out.push(ParsedStreamEvent::error(message));
            }
            "ping" => {}
            other => tracing::trace!(event_type = other, "ignoring unknown SSE event type"),
        }
    }
}

impl FrameParser for AnthropicStreamParser {
    fn feed_line(&mut self, line: &str, out: &mut Vec<ParsedStreamEvent>) {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return;
        }

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event_type = Some(event_type.trim().to_owned());
            return;
        }

        let Some(data) = line.strip_prefix("data:") else {
            tracing::trace!(line, "ignoring unrecognised SSE line");
            return;
        };

        let stashed = self.current_event_type.take();
        let v: Value = match serde_json::from_str(data.trim()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "skipping malformed SSE frame");
                return;
            }
        };

        let event_type = stashed
            .or_else(|| v["type"].as_str().map(String::from))
            .unwrap_or_default();
        self.handle(&event_type, &v, out);
    }

    fn finish(&mut self, _out: &mut Vec<ParsedStreamEvent>) {}
}
