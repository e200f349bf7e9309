//! Local Ollama adapter.
//!
//! Plain prompts go to `/api/generate`; requests with history or tools go
//! to `/api/chat`.  Streaming responses are newline-delimited JSON records,
//! the last of which carries `"done": true`.  Ollama does not assign tool
//! call ids, so ids are synthesized.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::events::{ParsedStreamEvent, ToolCallAssembler};
use crate::llm::provider::{
    LlmProvider, ProviderConfig, backend_error, http_client, model_names, read_json, send_error,
};
use crate::llm::stream::{EventSink, FrameParser, TerminalGuard, pump_response};
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolCall, ToolChoice,
    ToolSpec, Usage, new_call_id,
};

const PROVIDER: &str = "ollama";

/// Adapter for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl OllamaProvider {
    /// Create an adapter from its configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url(),
            model: config.model_name(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http: http_client(PROVIDER, config.timeout_secs)?,
        })
    }

    /// The endpoint path a request is sent to.
    pub fn endpoint_for(request: &CompletionRequest) -> &'static str {
        if request.is_conversational() {
            "/api/chat"
        } else {
            "/api/generate"
        }
    }

    /// Build the JSON body for `/api/generate` or `/api/chat`.
    pub fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut options = json!({
            "num_predict": request.max_tokens.unwrap_or(self.max_tokens),
        });
        if let Some(temp) = request.temperature.or(self.temperature) {
            options["temperature"] = json!(temp);
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "stream": stream,
            "options": options,
        });

        if request.is_conversational() {
            body["messages"] = json!(request_messages(request));
            // Ollama has no tool-choice control; `none` is honoured by not
            // offering tools at all.
            if request.sends_tools() {
                body["tools"] = tools_to_ollama(&request.tools);
            }
            if let Some(choice) = &request.tool_choice
                && !matches!(choice, ToolChoice::Auto | ToolChoice::None)
            {
                tracing::debug!(?choice, provider = PROVIDER, "tool choice hint ignored");
            }
        } else {
            body["prompt"] = json!(request.prompt);
            if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
                body["system"] = json!(system);
            }
        }

        body
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, Self::endpoint_for(request));
        let body = self.build_request_body(request, stream);
        tracing::debug!(url = %url, model = %body["model"], provider = PROVIDER, "sending LLM request");
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, &url, e))
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER, &url, e))?;
        let v = read_json(PROVIDER, resp).await?;
        Ok(model_names(&v, "models", "name"))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let resp = self.send(request, false).await?;
        let v = read_json(PROVIDER, resp).await.map_err(with_pull_hint)?;
        Ok(parse_response(&v))
    }

    async fn stream_complete(&self, request: &CompletionRequest, on_event: EventSink<'_>) {
        let mut guard = TerminalGuard::new(on_event);
        match self.send(request, true).await {
            Ok(resp) if resp.status().is_success() => {
                pump_response(resp, OllamaStreamParser::new(), &mut guard).await;
            }
            Ok(resp) => {
                let err = with_pull_hint(backend_error(PROVIDER, resp).await);
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

/// Point the user at `ollama pull` when the model is missing locally.
fn with_pull_hint(err: AgentError) -> AgentError {
    match err {
        AgentError::Backend {
            provider,
            status,
            message,
        } if message.contains("not found") && message.contains("model") => AgentError::Backend {
            provider,
            status,
            message: format!("{message} (run `ollama pull <model>` first)"),
        },
        other => other,
    }
}

// ===========================================================================
// Format conversion
// ===========================================================================

fn request_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut wire = Vec::with_capacity(request.history.len() + 2);
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        wire.push(json!({"role": "system", "content": system}));
    }
    wire.extend(messages_to_ollama(&request.history));
    if !request.prompt.is_empty() {
        wire.push(json!({"role": "user", "content": request.prompt}));
    }
    wire
}

/// Convert internal messages to the Ollama chat format.
///
/// Arguments are sent as JSON objects.  Tool results use `role: "tool"` and
/// carry the tool name, looked up from the assistant message that made the
/// call.
pub fn messages_to_ollama(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::System => wire.push(json!({"role": "system", "content": msg.content})),
            Role::User => wire.push(json!({"role": "user", "content": msg.content})),
            Role::Assistant => {
                let mut entry = json!({"role": "assistant", "content": msg.content});
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| json!({"function": {"name": tc.name, "arguments": tc.arguments}}))
                        .collect();
                    entry["tool_calls"] = json!(calls);
                }
                wire.push(entry);
            }
            Role::ToolResult => {
                let Some(result) = &msg.tool_result else {
                    continue;
                };
                let mut entry = json!({"role": "tool", "content": result.content});
                if let Some(name) = tool_name_for(&messages[..i], &result.tool_call_id) {
                    entry["tool_name"] = json!(name);
                }
                wire.push(entry);
            }
        }
    }

    wire
}

fn tool_name_for<'a>(earlier: &'a [Message], call_id: &str) -> Option<&'a str> {
    earlier
        .iter()
        .rev()
        .flat_map(|m| m.tool_calls.iter())
        .find(|c| c.id == call_id)
        .map(|c| c.name.as_str())
}

/// Convert tool definitions into the Ollama format (OpenAI-style wrapper).
pub fn tools_to_ollama(tools: &[ToolSpec]) -> Value {
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

fn parse_usage(v: &Value) -> Option<Usage> {
    if v.get("prompt_eval_count").is_none() && v.get("eval_count").is_none() {
        return None;
    }
    Some(Usage {
        input_tokens: v["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["eval_count"].as_u64().unwrap_or(0) as u32,
    })
}

fn map_done_reason(v: &Value, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolUse;
    }
    match v["done_reason"].as_str() {
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

/// Parse a non-streaming `/api/generate` or `/api/chat` response.
pub fn parse_response(v: &Value) -> CompletionResponse {
    let message = &v["message"];
    let content = message["content"]
        .as_str()
        .or_else(|| v["response"].as_str())
        .unwrap_or_default()
        .to_owned();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let func = &tc["function"];
                    let arguments = match &func["arguments"] {
                        Value::String(s) => {
                            crate::llm::events::parse_arguments(func["name"].as_str().unwrap_or_default(), s)
                        }
                        Value::Object(_) => func["arguments"].clone(),
                        _ => crate::llm::types::empty_arguments(),
                    };
                    ToolCall {
                        id: tc["id"]
                            .as_str()
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .unwrap_or_else(new_call_id),
                        name: func["name"].as_str().unwrap_or_default().to_owned(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    CompletionResponse {
        content,
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        finish_reason: map_done_reason(v, !tool_calls.is_empty()),
        tool_calls,
        usage: parse_usage(v),
    }
}

// ---------------------------------------------------------------------------
// Stream normalizer
// ---------------------------------------------------------------------------

/// Normalizes Ollama's NDJSON stream.
///
/// Tool calls arrive whole inside a single record, so each one is started
/// and ended immediately.
#[derive(Debug, Default)]
pub struct OllamaStreamParser {
    calls: ToolCallAssembler,
    next_key: usize,
}

impl OllamaStreamParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameParser for OllamaStreamParser {
    fn feed_line(&mut self, line: &str, out: &mut Vec<ParsedStreamEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let v: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(provider = PROVIDER, error = %e, "skipping malformed NDJSON record");
                return;
            }
        };

        if let Some(message) = crate::llm::provider::error_envelope_message(&v) {
            out.push(ParsedStreamEvent::error(message));
            return;
        }

        let text = v["message"]["content"]
            .as_str()
            .or_else(|| v["response"].as_str())
            .unwrap_or_default();
        if !text.is_empty() {
            out.push(ParsedStreamEvent::Text(text.to_owned()));
        }

        if let Some(tool_calls) = v["message"]["tool_calls"].as_array() {
            for tc in tool_calls {
                let key = self.next_key;
                self.next_key += 1;
                let func = &tc["function"];
                let arguments = match &func["arguments"] {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                self.calls
                    .fragment(key, tc["id"].as_str(), func["name"].as_str(), Some(&arguments), out);
                self.calls.end(key, out);
            }
        }

        if v["done"].as_bool() == Some(true) {
            self.calls.finish(out);
            out.push(ParsedStreamEvent::Done {
                finish_reason: map_done_reason(&v, !self.calls.is_empty()),
                usage: parse_usage(&v),
            });
        }
    }

    fn finish(&mut self, _out: &mut Vec<ParsedStreamEvent>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stream::normalize_chunks;
    use crate::llm::types::ToolResult;

    fn provider() -> OllamaProvider {
        OllamaProvider::new(&ProviderConfig::ollama("llama3")).unwrap()
    }

    #[test]
    fn plain_prompt_uses_generate() {
        let mut request = CompletionRequest::new("Write a haiku");
        request.system_prompt = Some("Be brief.".into());
        request.max_tokens = Some(100);
        request.temperature = Some(0.2);

        assert_eq!(OllamaProvider::endpoint_for(&request), "/api/generate");
        let body = provider().build_request_body(&request, true);
        assert_eq!(body["prompt"], "Write a haiku");
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["num_predict"], 100);
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn history_uses_chat() {
        let mut request = CompletionRequest::new("And then?");
        request.history = vec![Message::user("Once upon a time"), Message::assistant("there was")];

        assert_eq!(OllamaProvider::endpoint_for(&request), "/api/chat");
        let body = provider().build_request_body(&request, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["content"], "And then?");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn tool_choice_none_omits_tools() {
        let mut request = CompletionRequest::new("hi");
        request.tools = vec![ToolSpec {
            name: "get_book".into(),
            description: "Read a book".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = provider().build_request_body(&request, false);
        assert_eq!(body["tools"][0]["function"]["name"], "get_book");

        request.tool_choice = Some(crate::llm::types::ToolChoice::None);
        let body = provider().build_request_body(&request, false);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_results_carry_tool_name() {
        let messages = vec![
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "read_chapter", json!({"x": 1}))]),
            Message::tool_result(ToolResult::ok("c1", "# Chapter")),
        ];
        let wire = messages_to_ollama(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"]["x"], 1);
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_name"], "read_chapter");
    }

    #[test]
    fn parse_chat_response_with_tool_call() {
        let v = json!({
            "model": "llama3",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "get_book", "arguments": {"slug": "b"}}}]
            },
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 4
        });
        let resp = parse_response(&v);
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
        assert!(resp.tool_calls[0].id.starts_with("call_"));
        assert_eq!(resp.tool_calls[0].arguments["slug"], "b");
        assert_eq!(resp.usage, Some(Usage { input_tokens: 12, output_tokens: 4 }));
    }

    #[test]
    fn parse_generate_response_length() {
        let v = json!({"model": "llama3", "response": "Once", "done": true, "done_reason": "length"});
        let resp = parse_response(&v);
        assert_eq!(resp.content, "Once");
        assert_eq!(resp.finish_reason, FinishReason::Length);
    }

    #[test]
    fn stream_text_and_done() {
        let chunks = [
            "{\"model\":\"llama3\",\"response\":\"Hel\",\"done\":false}\n{\"model\":\"llama3\",\"resp",
            "onse\":\"lo\",\"done\":false}\n",
            "{\"model\":\"llama3\",\"response\":\"\",\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":3,\"eval_count\":2}\n",
        ];
        let events = normalize_chunks(OllamaStreamParser::new(), chunks);
        assert_eq!(
            events,
            vec![
                ParsedStreamEvent::Text("Hel".into()),
                ParsedStreamEvent::Text("lo".into()),
                ParsedStreamEvent::Done {
                    finish_reason: FinishReason::Stop,
                    usage: Some(Usage { input_tokens: 3, output_tokens: 2 }),
                },
            ]
        );
    }

    #[test]
    fn stream_skips_malformed_frames() {
        let chunks = [
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assis\n",
            "garbage\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        ];
        let events = normalize_chunks(OllamaStreamParser::new(), chunks);

        assert_eq!(events[0], ParsedStreamEvent::Text("Hel".into()));
        assert_eq!(events[1], ParsedStreamEvent::Text("lo".into()));
        assert!(matches!(
            events[2],
            ParsedStreamEvent::Done { finish_reason: FinishReason::Stop, .. }
        ));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn stream_tool_calls_get_unique_ids() {
        let chunks = [
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"read_chapter\",\"arguments\":{\"chapterSlug\":\"c\"}}},{\"function\":{\"name\":\"get_book\",\"arguments\":{}}}]},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ];
        let events = normalize_chunks(OllamaStreamParser::new(), chunks);
        let ends: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                ParsedStreamEvent::ToolCallEnd(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(ends.len(), 2);
        assert_ne!(ends[0].id, ends[1].id);
        assert_eq!(ends[0].arguments["chapterSlug"], "c");
        assert!(matches!(
            events.last(),
            Some(ParsedStreamEvent::Done { finish_reason: FinishReason::ToolUse, .. })
        ));
    }

    #[test]
    fn stream_error_record() {
        let events = normalize_chunks(
            OllamaStreamParser::new(),
            ["{\"error\":\"model 'mistral' not found\"}\n"],
        );
        assert_eq!(events, vec![ParsedStreamEvent::error("model 'mistral' not found")]);
    }

    #[test]
    fn missing_model_hint() {
        let err = with_pull_hint(AgentError::Backend {
            provider: "ollama".into(),
            status: Some(404),
            message: "model 'x' not found".into(),
        });
        assert!(err.to_string().contains("ollama pull"));
    }
}
