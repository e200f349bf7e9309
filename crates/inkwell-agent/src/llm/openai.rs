//! OpenAI Chat Completions adapter.
//!
//! Also serves OpenAI-compatible endpoints (vLLM, LM Studio, Together) via
//! the configured base URL.  Streaming uses SSE `data:` lines terminated by
//! `data: [DONE]`; tool-call fragments are correlated by their `index`.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::context::flatten_tool_turns;
use crate::llm::events::{ParsedStreamEvent, ToolCallAssembler, parse_arguments};
use crate::llm::provider::{
    LlmProvider, ProviderConfig, http_client, model_names, read_json, send_error,
};
use crate::llm::stream::{EventSink, FrameParser, TerminalGuard, pump_response};
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolCall, ToolChoice,
    ToolSpec, Usage, new_call_id,
};

const PROVIDER: &str = "openai";

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl OpenAiProvider {
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

    /// Build the JSON body for the Chat Completions API.
    pub fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": request_messages(request),
        });

        if let Some(temp) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = tool_choice_to_openai(choice);
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
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| {
                AgentError::MissingCredentials {
                    provider: format!("{PROVIDER} (invalid authorization header: {e})"),
                }
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let headers = self.headers()?;
        let url = format!("{}/chat/completions", self.base_url);
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
        let url = format!("{}/models", self.base_url);
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
impl LlmProvider for OpenAiProvider {
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
                pump_response(resp, OpenAiStreamParser::new(), &mut guard).await;
            }
            Ok(resp) => {
                let err = crate::llm::provider::backend_error(PROVIDER, resp).await;
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

/// Assemble the `messages` array: system prompt, history, then the prompt.
fn request_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut wire = Vec::with_capacity(request.history.len() + 2);
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        wire.push(json!({"role": "system", "content": system}));
    }
    if request.tools.is_empty() {
        wire.extend(messages_to_openai(&flatten_tool_turns(&request.history)));
    } else {
        wire.extend(messages_to_openai(&request.history));
    }
    if !request.prompt.is_empty() {
        wire.push(json!({"role": "user", "content": request.prompt}));
    }
    wire
}

/// Convert internal messages to the OpenAI wire format.
///
/// Tool calls live in `assistant.tool_calls` with string-encoded arguments
/// and tool results use `role: "tool"` with a `tool_call_id`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                wire_messages.push(json!({"role": "system", "content": msg.content}));
            }
            Role::User => {
                wire_messages.push(json!({"role": "user", "content": msg.content}));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();

                    let content = if msg.content.is_empty() {
                        Value::Null
                    } else {
                        json!(msg.content)
                    };
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
            }
            Role::ToolResult => {
                let Some(result) = &msg.tool_result else {
                    continue;
                };
                wire_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": result.tool_call_id,
                    "content": result.content,
                }));
            }
        }
    }

    wire_messages
}

/// Convert tool definitions into the OpenAI format.
///
/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolSpec]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    json!(tool_values)
}

fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Map an OpenAI `finish_reason`.
pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("tool_calls" | "function_call") => FinishReason::ToolUse,
        Some("content_filter") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let usage = v.get("usage").filter(|u| u.is_object())?;
    Some(Usage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
    })
}

/// Parse a non-streaming Chat Completions response.
pub fn parse_response(v: &Value) -> Result<CompletionResponse> {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    if message.is_null() {
        return Err(AgentError::ParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let func = &tc["function"];
                    let name = func["name"].as_str().unwrap_or_default().to_owned();
                    let arguments = match &func["arguments"] {
                        Value::String(s) => parse_arguments(&name, s),
                        Value::Object(_) => func["arguments"].clone(),
                        _ => parse_arguments(&name, ""),
                    };
                    ToolCall {
                        id: tc["id"]
                            .as_str()
                            .filter(|id| !id.is_empty())
                            .map_or_else(new_call_id, str::to_owned),
                        name,
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let mut finish_reason = map_finish_reason(choice["finish_reason"].as_str());
    if !tool_calls.is_empty() && finish_reason == FinishReason::Stop {
        finish_reason = FinishReason::ToolUse;
    }

    Ok(CompletionResponse {
        content: message["content"].as_str().unwrap_or_default().to_owned(),
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        tool_calls,
        finish_reason,
        usage: parse_usage(v),
    })
}

// ---------------------------------------------------------------------------
// Stream normalizer
// ---------------------------------------------------------------------------

/// Normalizes an OpenAI SSE stream.
///
/// Text arrives in `choices[0].delta.content`.  Tool calls arrive as
/// `choices[0].delta.tool_calls[]` fragments keyed by `index`; the id and
/// name usually only appear on the first fragment of each call.
#[derive(Debug, Default)]
pub struct OpenAiStreamParser {
    calls: ToolCallAssembler,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl OpenAiStreamParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    fn complete(&mut self, out: &mut Vec<ParsedStreamEvent>) {
        if self.done {
            return;
        }
        self.done = true;
        self.calls.finish(out);
        let mut finish_reason = self.finish_reason.unwrap_or_default();
        if !self.calls.is_empty() && finish_reason == FinishReason::Stop {
            finish_reason = FinishReason::ToolUse;
        }
        out.push(ParsedStreamEvent::Done {
            finish_reason,
            usage: self.usage,
        });
    }
}

impl FrameParser for OpenAiStreamParser {
    fn feed_line(&mut self, line: &str, out: &mut Vec<ParsedStreamEvent>) {
        let line = line.trim_end();

        // Skip empty lines, comments, and non-data fields.
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            tracing::trace!(line, "ignoring non-data SSE line");
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.complete(out);
            return;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "skipping malformed SSE frame");
                return;
            }
        };

        if let Some(message) = crate::llm::provider::error_envelope_message(&v) {
            out.push(ParsedStreamEvent::error(message));
            return;
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        if let Some(content) = delta["content"].as_str()
            && !content.is_empty()
        {
            out.push(ParsedStreamEvent::Text(content.to_owned()));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                let func = &tc["function"];
                self.calls.fragment(
                    index,
                    tc["id"].as_str(),
                    func["name"].as_str(),
                    func["arguments"].as_str(),
                    out,
                );
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(map_finish_reason(Some(reason)));
        }

        // Some compatible servers put usage on the last chunk.
        if let Some(usage) = parse_usage(&v) {
            self.usage = Some(usage);
        }
    }

    fn finish(&mut self, out: &mut Vec<ParsedStreamEvent>) {
        // Without `[DONE]` the response only counts as complete when the
        // backend reported a finish reason.
        if self.finish_reason.is_some() {
            self.complete(out);
        }
    }
}
