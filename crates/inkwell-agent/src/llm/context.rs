//! Bounded conversation context for provider requests.
//!
//! Only the most recent messages are sent to a provider.  Cutting the
//! transcript at an arbitrary point can leave tool results without the
//! assistant message that requested them (or tool calls that never got a
//! result, after a rejection or a stop), which every hosted backend rejects.
//! [`build_context`] repairs both cases and keeps the window opening on a
//! user turn.  [`flatten_tool_turns`] rewrites tool traffic as text for
//! requests that declare no tools.

use std::collections::HashSet;

use crate::llm::types::{Message, Role};

/// Smallest history window accepted by the configuration.
pub const MIN_HISTORY_WINDOW: usize = 10;

/// Largest history window accepted by the configuration.
pub const MAX_HISTORY_WINDOW: usize = 20;

/// Select the provider-facing context from a conversation.
///
/// Keeps the last `window` messages, skips run-failure messages, drops tool
/// results whose call is outside the window, and strips tool calls that have
/// no result inside the window.
///
/// When the cut lands after a user message, the closest earlier user message
/// takes the place of the oldest windowed one, so the context still opens
/// with a user turn.
pub fn build_context(messages: &[Message], window: usize) -> Vec<Message> {
    let eligible: Vec<&Message> = messages.iter().filter(|m| !m.is_error).collect();
    let mut start = eligible.len().saturating_sub(window);

    let mut anchor = None;
    if start > 0
        && start < eligible.len()
        && eligible[start].role != Role::User
        && let Some(pos) = eligible[..start].iter().rposition(|m| m.role == Role::User)
    {
        anchor = Some(eligible[pos]);
        start += 1;
    }
    let recent: Vec<&Message> = anchor
        .into_iter()
        .chain(eligible[start..].iter().copied())
        .collect();

    let answered: HashSet<&str> = recent.iter().filter_map(|m| m.tool_call_id()).collect();
    let mut requested: HashSet<String> = HashSet::new();

    let mut context = Vec::with_capacity(recent.len());
    for msg in &recent {
        match msg.role {
            Role::ToolResult => {
                let Some(id) = msg.tool_call_id() else {
                    continue;
                };
                if requested.contains(id) {
                    context.push((*msg).clone());
                } else {
                    tracing::trace!(call_id = id, "dropping tool result without its call");
                }
            }
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let mut kept = (*msg).clone();
                kept.tool_calls.retain(|c| answered.contains(c.id.as_str()));
                for call in &kept.tool_calls {
                    requested.insert(call.id.clone());
                }
                if kept.tool_calls.is_empty() && kept.content.trim().is_empty() {
                    continue;
                }
                context.push(kept);
            }
            _ => context.push((*msg).clone()),
        }
    }
    context
}

/// Rewrite tool calls and tool results as plain assistant text.
///
/// Used for requests that carry no tool definitions: backends refuse
/// tool-call blocks they cannot match to a declared tool.  Results are
/// folded into the assistant turn that requested them, and consecutive
/// assistant turns are joined, so user and assistant turns keep alternating.
pub fn flatten_tool_turns(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::ToolResult => {
                let Some(result) = &msg.tool_result else {
                    continue;
                };
                let label = if result.is_error { "failed" } else { "result" };
                match out.last_mut() {
                    Some(prev) if prev.role == Role::Assistant => {
                        prev.content.push_str(&format!("\n[{label}] {}", result.content));
                    }
                    _ => {
                        tracing::trace!(call_id = %result.tool_call_id, "dropping tool result without its call");
                    }
                }
            }
            Role::Assistant => {
                let mut text = msg.content.clone();
                for call in &msg.tool_calls {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&format!("[called {}({})]", call.name, call.arguments));
                }
                match out.last_mut() {
                    Some(prev) if prev.role == Role::Assistant => {
                        prev.content.push_str("\n\n");
                        prev.content.push_str(&text);
                    }
                    _ => {
                        let mut flat = msg.clone();
                        flat.content = text;
                        flat.tool_calls.clear();
                        out.push(flat);
                    }
                }
            }
            _ => out.push(msg.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ToolCall, ToolResult};
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "get_book", json!({"slug": "b"}))
    }

    #[test]
    fn keeps_only_the_recent_window() {
        let messages: Vec<Message> = (0..30).map(|i| Message::user(format!("msg {i}"))).collect();
        let ctx = build_context(&messages, 20);
        assert_eq!(ctx.len(), 20);
        assert_eq!(ctx[0].content, "msg 10");
        assert_eq!(ctx[19].content, "msg 29");
    }

    #[test]
    fn drops_orphaned_leading_tool_results() {
        let messages = vec![
            Message::assistant_with_tools("", vec![call("t1")]),
            Message::tool_result(ToolResult::ok("t1", "book")),
            Message::assistant("done"),
        ];
        let ctx = build_context(&messages, 2);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].content, "done");
    }

    #[test]
    fn strips_unanswered_tool_calls() {
        let messages = vec![
            Message::user("edit both chapters"),
            Message::assistant_with_tools("Working on it.", vec![call("t1"), call("t2")]),
            Message::tool_result(ToolResult::error("t1", "rejected by user")),
        ];
        let ctx = build_context(&messages, 20);
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx[1].tool_calls.len(), 1);
        assert_eq!(ctx[1].tool_calls[0].id, "t1");
    }

    #[test]
    fn drops_empty_assistant_after_stripping() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tools("", vec![call("t1")]),
        ];
        let ctx = build_context(&messages, 20);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn window_opens_on_a_user_turn() {
        let mut messages = vec![Message::user("tidy up every chapter")];
        for i in 0..12 {
            let id = format!("t{i}");
            messages.push(Message::assistant_with_tools("", vec![call(&id)]));
            messages.push(Message::tool_result(ToolResult::ok(&id, "ok")));
        }

        let ctx = build_context(&messages, 20);

        assert!(ctx.len() <= 20);
        assert_eq!(ctx[0].role, Role::User);
        assert_eq!(ctx[0].content, "tidy up every chapter");
        assert_eq!(ctx[1].role, Role::Assistant);
        // Every remaining result still follows its call.
        let last = ctx.last().unwrap();
        assert_eq!(last.tool_call_id(), Some("t11"));
    }

    #[test]
    fn flattening_folds_results_into_assistant_text() {
        let messages = vec![
            Message::user("what is in b?"),
            Message::assistant_with_tools("Looking.", vec![call("t1")]),
            Message::tool_result(ToolResult::ok("t1", "# Book")),
            Message::assistant("It has one chapter."),
            Message::user("thanks"),
        ];

        let flat = flatten_tool_turns(&messages);

        let roles: Vec<Role> = flat.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert!(flat.iter().all(|m| m.tool_calls.is_empty() && m.tool_result.is_none()));
        assert_eq!(
            flat[1].content,
            "Looking.\n[called get_book({\"slug\":\"b\"})]\n[result] # Book\n\nIt has one chapter."
        );
    }

    #[test]
    fn skips_run_failure_messages() {
        let messages = vec![
            Message::user("hello"),
            Message::assistant_error("Error (transport): connection refused"),
        ];
        let ctx = build_context(&messages, 20);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].role, Role::User);
    }
}
