//! Provider-agnostic stream events.
//!
//! Every provider adapter turns its native streaming format into a sequence
//! of [`ParsedStreamEvent`] values.  Tool-call arguments arrive as fragments
//! on most backends, so this module also provides the [`ToolCallAssembler`]
//! that buffers fragments per call and the [`StreamCollector`] that folds an
//! event sequence back into a [`CompletionResponse`].

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{CompletionResponse, FinishReason, ToolCall, Usage, empty_arguments};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A single normalized unit of streamed model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStreamEvent {
    /// A fragment of assistant text.
    Text(String),

    /// A tool call has started.
    ToolCallStart {
        /// Call id, stable until the matching end event.
        id: String,
        /// Tool name.
        name: String,
    },

    /// A fragment of raw argument JSON for the open tool call.
    ToolCallDelta {
        /// Call id.
        id: String,
        /// Raw JSON text fragment.  Not valid JSON on its own.
        arguments: String,
    },

    /// The tool call is complete; arguments are parsed.
    ToolCallEnd(ToolCall),

    /// The response finished normally.
    Done {
        /// Normalized finish reason.
        finish_reason: FinishReason,
        /// Token usage, when the backend reported it.
        usage: Option<Usage>,
    },

    /// The response failed.
    Error {
        /// User-visible description of the failure.
        message: String,
    },
}

impl ParsedStreamEvent {
    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Parse an accumulated argument buffer.
///
/// An empty buffer yields `{}`.  A buffer that is not valid JSON is logged
/// and also yields `{}` so one bad call never fails the whole stream.
pub fn parse_arguments(name: &str, buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return empty_arguments();
    }
    match serde_json::from_str(buffer) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "tool call arguments are not valid JSON; using {{}}");
            empty_arguments()
        }
    }
}

// ---------------------------------------------------------------------------
// Tool call assembler
// ---------------------------------------------------------------------------

/// In-progress tool call being assembled from streaming fragments.
#[derive(Debug)]
struct PendingCall {
    key: usize,
    id: String,
    name: String,
    arguments: String,
    /// The backend signalled the end of this call.
    complete: bool,
    /// End already emitted.
    closed: bool,
}

/// Tracks partial `{id, name, arguments}` records per in-flight call.
///
/// Calls are keyed by the backend's own correlation key (array index or
/// content block index).  Only one call is open on the output at a time:
/// fragments for other keys are buffered and replayed once the open call
/// ends, so consumers always see `start → delta* → end` per call even when
/// the transport interleaves calls.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<PendingCall>,
    open: Option<usize>,
    synthesized: usize,
}

impl ToolCallAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any call was observed.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Feed one fragment for the call identified by `key`.
    pub fn fragment(
        &mut self,
        key: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
        out: &mut Vec<ParsedStreamEvent>,
    ) {
        let pos = match self.calls.iter().position(|c| c.key == key) {
            Some(pos) => pos,
            None => {
                self.calls.push(PendingCall {
                    key,
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                    complete: false,
                    closed: false,
                });
                self.calls.len() - 1
            }
        };

        let call = &mut self.calls[pos];
        if call.closed {
            tracing::warn!(key, id = %call.id, "dropping fragment for a tool call that already ended");
            return;
        }
        if call.id.is_empty()
            && let Some(id) = id.filter(|s| !s.is_empty())
        {
            call.id = id.to_owned();
        }
        if let Some(name) = name {
            call.name.push_str(name);
        }
        let fragment = arguments.unwrap_or_default();
        call.arguments.push_str(fragment);

        match self.open {
            Some(open) if open == pos => {
                if !fragment.is_empty() {
                    out.push(ParsedStreamEvent::ToolCallDelta {
                        id: self.calls[pos].id.clone(),
                        arguments: fragment.to_owned(),
                    });
                }
            }
            Some(open) => {
                // A new call only pre-empts the open one once the open
                // call's arguments form a complete JSON document.
                let finished = {
                    let current = &self.calls[open];
                    !current.arguments.trim().is_empty()
                        && serde_json::from_str::<Value>(&current.arguments).is_ok()
                };
                if finished {
                    self.calls[open].complete = true;
                    self.close_open(out);
                    self.advance(out);
                }
            }
            None => self.advance(out),
        }
    }

    /// The backend signalled the end of the call identified by `key`.
    pub fn end(&mut self, key: usize, out: &mut Vec<ParsedStreamEvent>) {
        let Some(pos) = self.calls.iter().position(|c| c.key == key) else {
            return;
        };
        self.calls[pos].complete = true;
        if self.open == Some(pos) {
            self.close_open(out);
        }
        self.advance(out);
    }

    /// End every call still buffered or open, in first-seen order.
    pub fn finish(&mut self, out: &mut Vec<ParsedStreamEvent>) {
        for call in &mut self.calls {
            call.complete = true;
        }
        if self.open.is_some() {
            self.close_open(out);
        }
        self.advance(out);
    }

    /// Open the next unfinished call, replaying its buffered fragments.
    /// Calls that are already complete are closed immediately.
    fn advance(&mut self, out: &mut Vec<ParsedStreamEvent>) {
        while self.open.is_none() {
            let Some(pos) = self.calls.iter().position(|c| !c.closed) else {
                return;
            };
            self.start(pos, out);
            self.open = Some(pos);
            if self.calls[pos].complete {
                self.close_open(out);
            }
        }
    }

    fn start(&mut self, pos: usize, out: &mut Vec<ParsedStreamEvent>) {
        if self.calls[pos].id.is_empty() {
            self.synthesized += 1;
            self.calls[pos].id = crate::llm::types::new_call_id();
        }
        let call = &self.calls[pos];
        out.push(ParsedStreamEvent::ToolCallStart {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        if !call.arguments.is_empty() {
            out.push(ParsedStreamEvent::ToolCallDelta {
                id: call.id.clone(),
                arguments: call.arguments.clone(),
            });
        }
    }

    fn close_open(&mut self, out: &mut Vec<ParsedStreamEvent>) {
        let Some(pos) = self.open.take() else {
            return;
        };
        let call = &mut self.calls[pos];
        call.closed = true;
        let arguments = parse_arguments(&call.name, &call.arguments);
        out.push(ParsedStreamEvent::ToolCallEnd(ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }));
    }

    /// Number of ids this assembler had to synthesize.
    pub fn synthesized_ids(&self) -> usize {
        self.synthesized
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Folds a stream of events into a [`CompletionResponse`].
#[derive(Debug, Default)]
pub struct StreamCollector {
    provider: String,
    model: String,
    text: String,
    tool_calls: Vec<ToolCall>,
    finish: Option<(FinishReason, Option<Usage>)>,
    error: Option<String>,
}

impl StreamCollector {
    /// Create a collector for responses from `provider`.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Apply a single event.
    pub fn apply(&mut self, event: &ParsedStreamEvent) {
        match event {
            ParsedStreamEvent::Text(t) => self.text.push_str(t),
            ParsedStreamEvent::ToolCallEnd(call) => self.tool_calls.push(call.clone()),
            ParsedStreamEvent::Done {
                finish_reason,
                usage,
            } => self.finish = Some((*finish_reason, *usage)),
            ParsedStreamEvent::Error { message } => self.error = Some(message.clone()),
            ParsedStreamEvent::ToolCallStart { .. } | ParsedStreamEvent::ToolCallDelta { .. } => {}
        }
    }

    /// Convert the collected events into a response.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Backend`] when the stream ended with an error
    /// event and [`AgentError::ParseFailed`] when it never terminated.
    pub fn into_response(self) -> Result<CompletionResponse> {
        if let Some(message) = self.error {
            return Err(AgentError::Backend {
                provider: self.provider,
                status: None,
                message,
            });
        }
        let Some((finish_reason, usage)) = self.finish else {
            return Err(AgentError::ParseFailed {
                reason: "stream ended without a completion marker".into(),
            });
        };
        Ok(CompletionResponse {
            content: self.text,
            model: self.model,
            tool_calls: self.tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn starts(events: &[ParsedStreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ParsedStreamEvent::ToolCallStart { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fragments_assemble_into_valid_json() {
        let mut asm = ToolCallAssembler::new();
        let mut out = Vec::new();
        asm.fragment(0, Some("call_1"), Some("read_chapter"), Some(""), &mut out);
        asm.fragment(0, None, None, Some("{\"bookSlug\":"), &mut out);
        asm.fragment(0, None, None, Some("\"b\"}"), &mut out);
        asm.finish(&mut out);

        assert_eq!(
            out,
            vec![
                ParsedStreamEvent::ToolCallStart {
                    id: "call_1".into(),
                    name: "read_chapter".into()
                },
                ParsedStreamEvent::ToolCallDelta {
                    id: "call_1".into(),
                    arguments: "{\"bookSlug\":".into()
                },
                ParsedStreamEvent::ToolCallDelta {
                    id: "call_1".into(),
                    arguments: "\"b\"}".into()
                },
                ParsedStreamEvent::ToolCallEnd(ToolCall::new(
                    "call_1",
                    "read_chapter",
                    json!({"bookSlug": "b"})
                )),
            ]
        );
    }

    #[test]
    fn invalid_arguments_fall_back_to_empty_object() {
        let mut asm = ToolCallAssembler::new();
        let mut out = Vec::new();
        asm.fragment(0, Some("c"), Some("get_book"), Some("{\"slug\":"), &mut out);
        asm.finish(&mut out);
        match out.last() {
            Some(ParsedStreamEvent::ToolCallEnd(call)) => assert_eq!(call.arguments, json!({})),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn interleaved_calls_are_serialized() {
        let mut asm = ToolCallAssembler::new();
        let mut out = Vec::new();
        asm.fragment(0, Some("a"), Some("first"), Some("{\"x\":"), &mut out);
        // Second call arrives while the first is still incomplete.
        asm.fragment(1, Some("b"), Some("second"), Some("{\"y\":2}"), &mut out);
        asm.fragment(0, None, None, Some("1}"), &mut out);
        asm.finish(&mut out);

        assert_eq!(starts(&out), vec!["first", "second"]);
        let a_end = out
            .iter()
            .position(|e| matches!(e, ParsedStreamEvent::ToolCallEnd(c) if c.id == "a"))
            .unwrap();
        let b_start = out
            .iter()
            .position(|e| matches!(e, ParsedStreamEvent::ToolCallStart { id, .. } if id == "b"))
            .unwrap();
        assert!(a_end < b_start);
        match &out[a_end] {
            ParsedStreamEvent::ToolCallEnd(c) => assert_eq!(c.arguments, json!({"x": 1})),
            _ => unreachable!(),
        }
    }

    #[test]
    fn new_call_closes_a_finished_open_call() {
        let mut asm = ToolCallAssembler::new();
        let mut out = Vec::new();
        asm.fragment(0, Some("a"), Some("first"), Some("{}"), &mut out);
        asm.fragment(1, Some("b"), Some("second"), Some(""), &mut out);
        // `a` ended as soon as `b` appeared, and `b` is now streaming live.
        assert!(matches!(out.last(), Some(ParsedStreamEvent::ToolCallStart { id, .. }) if id == "b"));
        asm.fragment(1, None, None, Some("{\"z\":true}"), &mut out);
        assert!(matches!(out.last(), Some(ParsedStreamEvent::ToolCallDelta { id, .. }) if id == "b"));
    }

    #[test]
    fn missing_ids_are_synthesized_once() {
        let mut asm = ToolCallAssembler::new();
        let mut out = Vec::new();
        asm.fragment(0, None, Some("get_book"), Some("{}"), &mut out);
        asm.finish(&mut out);
        let ParsedStreamEvent::ToolCallStart { id: start_id, .. } = &out[0] else {
            panic!("expected start");
        };
        let ParsedStreamEvent::ToolCallEnd(call) = out.last().unwrap() else {
            panic!("expected end");
        };
        assert!(start_id.starts_with("call_"));
        assert_eq!(&call.id, start_id);
        assert_eq!(asm.synthesized_ids(), 1);
    }

    #[test]
    fn collector_builds_response() {
        let mut collector = StreamCollector::new("openai", "gpt-4o");
        collector.apply(&ParsedStreamEvent::Text("Hel".into()));
        collector.apply(&ParsedStreamEvent::Text("lo".into()));
        collector.apply(&ParsedStreamEvent::ToolCallEnd(ToolCall::new(
            "t1",
            "get_book",
            json!({"slug": "b"}),
        )));
        collector.apply(&ParsedStreamEvent::Done {
            finish_reason: FinishReason::ToolUse,
            usage: None,
        });
        let resp = collector.into_response().unwrap();
        assert_eq!(resp.content, "Hello");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
    }

    #[test]
    fn collector_surfaces_stream_errors() {
        let mut collector = StreamCollector::new("anthropic", "claude");
        collector.apply(&ParsedStreamEvent::error("overloaded"));
        let err = collector.into_response().unwrap_err();
        assert!(matches!(err, AgentError::Backend { .. }));

        let collector = StreamCollector::new("anthropic", "claude");
        assert!(matches!(
            collector.into_response(),
            Err(AgentError::ParseFailed { .. })
        ));
    }
}
