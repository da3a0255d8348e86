//! SDK dialect mapper.
//!
//! Translates the dotted SDK event stream (`thread.started`, `turn.*`,
//! `item.{started,updated,completed}`) into canonical events. The SDK does
//! not always emit a turn id, so the mapper allocates one locally at
//! `turn.started` and attaches it to every event of that turn. Reasoning,
//! command, and tool-call label state lives here.

use std::collections::{HashMap, HashSet};

use relay_protocol::events::{CanonicalEvent, TodoItem, TokenUsage};
use serde_json::Value;

use crate::convert::{command_text, error_text, str_field, terminal_for_status, truthy};

#[derive(Debug, Clone, Default)]
struct SdkCommand {
    command: Option<String>,
    cwd: Option<String>,
    label: Option<String>,
    output: Option<String>,
}

/// Stateful mapper for one SDK-backed session.
#[derive(Default)]
pub struct SdkEventMapper {
    current_turn_id: Option<String>,
    seen_reasoning: HashSet<String>,
    reasoning_buffers: HashMap<String, String>,
    commands: HashMap<String, SdkCommand>,
    next_turn: u64,
    next_call: u64,
}

impl SdkEventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The locally-allocated (or backend-provided) id of the turn in flight.
    pub fn current_turn_id(&self) -> Option<&str> {
        self.current_turn_id.as_deref()
    }

    /// Drop all per-turn state.
    pub fn reset(&mut self) {
        self.current_turn_id = None;
        self.seen_reasoning.clear();
        self.reasoning_buffers.clear();
        self.commands.clear();
    }

    /// Translate one SDK event into zero or more canonical events.
    pub fn map(&mut self, event: &Value) -> Vec<CanonicalEvent> {
        let Some(event_type) = event.get("type").and_then(Value::as_str) else {
            return Vec::new();
        };

        match event_type {
            "thread.started" => match str_field(event, &["thread_id", "threadId"]) {
                Some(thread_id) => vec![CanonicalEvent::ThreadStarted { thread_id }],
                None => Vec::new(),
            },

            "turn.started" => {
                let turn_id = str_field(event, &["turn_id", "turnId", "id"])
                    .unwrap_or_else(|| self.alloc_turn_id());
                self.current_turn_id = Some(turn_id.clone());
                self.seen_reasoning.clear();
                vec![CanonicalEvent::TaskStarted {
                    turn_id: Some(turn_id),
                }]
            }

            "turn.completed" => {
                let mut events = Vec::new();
                if let Some(info) = event.get("usage").and_then(|u| TokenUsage::from_value(u)) {
                    events.push(CanonicalEvent::TokenCount { info: Some(info) });
                }
                let status = str_field(event, &["status"]);
                events.push(terminal_for_status(
                    status.as_deref(),
                    self.take_turn_id(),
                    None,
                ));
                events
            }

            "turn.aborted" | "turn.interrupted" | "turn.cancelled" | "turn.canceled" => {
                vec![CanonicalEvent::TurnAborted {
                    turn_id: self.take_turn_id(),
                }]
            }

            "turn.failed" | "turn.error" => vec![CanonicalEvent::TaskFailed {
                turn_id: self.take_turn_id(),
                error: event
                    .get("error")
                    .map(error_text)
                    .or_else(|| str_field(event, &["message"])),
            }],

            "stream.error" | "stream_error" => {
                if truthy(event.get("will_retry"))
                    || truthy(event.get("willRetry"))
                    || truthy(event.get("retryable"))
                {
                    return Vec::new();
                }
                vec![CanonicalEvent::StreamError {
                    message: str_field(event, &["message", "error"])
                        .unwrap_or_else(|| "stream error".to_string()),
                    additional_details: event
                        .get("additional_details")
                        .or_else(|| event.get("additionalDetails"))
                        .cloned(),
                }]
            }

            "error" => vec![CanonicalEvent::Error {
                message: str_field(event, &["message"]).unwrap_or_else(|| "error".to_string()),
                thread_id: str_field(event, &["thread_id", "threadId"]),
                turn_id: self.current_turn_id.clone(),
                additional_details: event
                    .get("additional_details")
                    .or_else(|| event.get("additionalDetails"))
                    .cloned(),
            }],

            "exec_approval_request" | "exec.approval_request" | "approval.requested" => {
                let call_id = str_field(event, &["call_id", "callId", "id"])
                    .unwrap_or_else(|| self.alloc_call_id());
                vec![CanonicalEvent::ExecApprovalRequest {
                    call_id,
                    command: command_text(event),
                    cwd: str_field(event, &["cwd"]),
                    message: str_field(event, &["message", "reason"]),
                    tool: str_field(event, &["tool"]),
                }]
            }

            "item.started" | "item.updated" | "item.completed" => {
                let phase = &event_type["item.".len()..];
                let item = event.get("item").unwrap_or(event);
                self.handle_item(phase, item)
            }

            _ => Vec::new(),
        }
    }

    fn handle_item(&mut self, phase: &str, item: &Value) -> Vec<CanonicalEvent> {
        let id = str_field(item, &["id", "item_id", "itemId"]).unwrap_or_default();
        match normalized_item_type(item).as_str() {
            "agentmessage" => {
                if phase != "completed" {
                    return Vec::new();
                }
                match str_field(item, &["text", "message"]) {
                    Some(message) if !message.is_empty() => {
                        vec![CanonicalEvent::AgentMessage { message }]
                    }
                    _ => Vec::new(),
                }
            }

            "reasoning" => self.handle_reasoning(phase, &id, item),

            "commandexecution" => self.handle_command(phase, &id, item),

            "filechange" => match phase {
                "started" => vec![CanonicalEvent::PatchApplyBegin {
                    call_id: id,
                    changes: item
                        .get("changes")
                        .and_then(Value::as_object)
                        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default(),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                }],
                "completed" => {
                    let success = item
                        .get("success")
                        .and_then(Value::as_bool)
                        .unwrap_or_else(|| {
                            str_field(item, &["status"]).as_deref() == Some("completed")
                        });
                    vec![CanonicalEvent::PatchApplyEnd {
                        call_id: id,
                        success,
                        changes: item
                            .get("changes")
                            .and_then(Value::as_object)
                            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                            .unwrap_or_default(),
                        auto_approved: None,
                        stdout: str_field(item, &["stdout"]),
                        stderr: str_field(item, &["stderr"]),
                        duration_ms: None,
                    }]
                }
                _ => Vec::new(),
            },

            "mcptoolcall" => {
                let server = str_field(item, &["server"]).unwrap_or_default();
                let tool = str_field(item, &["tool", "tool_name", "toolName"]).unwrap_or_default();
                let label = format!("mcp:{}/{}", server, tool);
                self.handle_labelled_call(phase, &id, item, label, |item| {
                    let result = item.get("result").cloned().unwrap_or(Value::Null);
                    result
                        .get("structured_content")
                        .or_else(|| result.get("structuredContent"))
                        .or_else(|| result.get("content"))
                        .map(to_text)
                })
            }

            "websearch" => {
                let query = str_field(item, &["query"]);
                let label = match &query {
                    Some(q) => format!("web_search {}", q),
                    None => "web_search".to_string(),
                };
                let output = match &query {
                    Some(q) => format!("Searched web: {}", q),
                    None => "Web search completed".to_string(),
                };
                let mut events = self.handle_labelled_call(phase, &id, item, label, move |_| {
                    Some(output.clone())
                });
                if phase == "completed" {
                    if let Some(CanonicalEvent::ExecCommandEnd { status, .. }) = events.last_mut() {
                        *status = Some("completed".to_string());
                    }
                }
                events
            }

            "todolist" => {
                if phase == "started" {
                    return Vec::new();
                }
                let raw = item
                    .get("items")
                    .or_else(|| item.get("todos"))
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                let items: Vec<TodoItem> = serde_json::from_value(raw).unwrap_or_default();
                vec![CanonicalEvent::TodoList { items }]
            }

            "error" => {
                if phase != "completed" {
                    return Vec::new();
                }
                vec![CanonicalEvent::Error {
                    message: str_field(item, &["message", "text"])
                        .unwrap_or_else(|| "error".to_string()),
                    thread_id: None,
                    turn_id: self.current_turn_id.clone(),
                    additional_details: None,
                }]
            }

            _ => Vec::new(),
        }
    }

    fn handle_reasoning(&mut self, phase: &str, id: &str, item: &Value) -> Vec<CanonicalEvent> {
        match phase {
            "started" => {
                let mut events = Vec::new();
                if !self.seen_reasoning.contains(id) {
                    if !self.seen_reasoning.is_empty() {
                        events.push(CanonicalEvent::AgentReasoningSectionBreak);
                    }
                    self.seen_reasoning.insert(id.to_string());
                }
                events
            }
            "updated" => {
                let Some(text) = str_field(item, &["text", "summary"]) else {
                    return Vec::new();
                };
                let buffer = self.reasoning_buffers.entry(id.to_string()).or_default();
                if text.len() > buffer.len() && text.starts_with(buffer.as_str()) {
                    let delta = text[buffer.len()..].to_string();
                    *buffer = text;
                    return vec![CanonicalEvent::AgentReasoningDelta { delta }];
                }
                Vec::new()
            }
            "completed" => {
                let buffered = self.reasoning_buffers.remove(id);
                let text = str_field(item, &["text", "summary"]).or(buffered);
                match text {
                    Some(text) if !text.is_empty() => vec![CanonicalEvent::AgentReasoning { text }],
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn handle_command(&mut self, phase: &str, id: &str, item: &Value) -> Vec<CanonicalEvent> {
        match phase {
            "started" => {
                let meta = SdkCommand {
                    command: command_text(item),
                    cwd: str_field(item, &["cwd"]),
                    label: None,
                    output: None,
                };
                let event = CanonicalEvent::ExecCommandBegin {
                    call_id: id.to_string(),
                    command: meta.command.clone(),
                    cwd: meta.cwd.clone(),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                    command_label: None,
                };
                self.commands.insert(id.to_string(), meta);
                vec![event]
            }
            "updated" => {
                // Aggregate output snapshots arrive on updates; keep the
                // latest for the completion fallback.
                if let Some(output) =
                    str_field(item, &["aggregated_output", "aggregatedOutput", "output"])
                {
                    if let Some(meta) = self.commands.get_mut(id) {
                        meta.output = Some(output);
                    }
                }
                Vec::new()
            }
            "completed" => {
                let meta = self.commands.remove(id).unwrap_or_default();
                let output = str_field(item, &["aggregated_output", "aggregatedOutput", "output"])
                    .or(meta.output);
                vec![CanonicalEvent::ExecCommandEnd {
                    call_id: id.to_string(),
                    command: meta.command,
                    command_label: meta.label,
                    output,
                    stderr: str_field(item, &["stderr"]),
                    error: item.get("error").map(error_text),
                    exit_code: item
                        .get("exit_code")
                        .or_else(|| item.get("exitCode"))
                        .and_then(Value::as_i64),
                    status: str_field(item, &["status"]),
                    duration_ms: item
                        .get("duration_ms")
                        .or_else(|| item.get("durationMs"))
                        .and_then(Value::as_u64),
                }]
            }
            _ => Vec::new(),
        }
    }

    fn handle_labelled_call(
        &mut self,
        phase: &str,
        id: &str,
        item: &Value,
        label: String,
        output_of: impl Fn(&Value) -> Option<String>,
    ) -> Vec<CanonicalEvent> {
        let call_id = if id.is_empty() {
            self.alloc_call_id()
        } else {
            id.to_string()
        };
        match phase {
            "started" => {
                self.commands.insert(
                    call_id.clone(),
                    SdkCommand {
                        command: None,
                        cwd: None,
                        label: Some(label.clone()),
                        output: None,
                    },
                );
                vec![CanonicalEvent::ExecCommandBegin {
                    call_id,
                    command: None,
                    cwd: None,
                    auto_approved: None,
                    command_label: Some(label),
                }]
            }
            "completed" => {
                let meta = self.commands.remove(&call_id).unwrap_or_default();
                vec![CanonicalEvent::ExecCommandEnd {
                    call_id,
                    command: None,
                    command_label: meta.label.or(Some(label)),
                    output: output_of(item),
                    stderr: None,
                    error: item.get("error").map(error_text),
                    exit_code: None,
                    status: str_field(item, &["status"]),
                    duration_ms: None,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn take_turn_id(&mut self) -> Option<String> {
        self.current_turn_id.take()
    }

    fn alloc_turn_id(&mut self) -> String {
        self.next_turn += 1;
        format!("turn-{}", self.next_turn)
    }

    fn alloc_call_id(&mut self) -> String {
        self.next_call += 1;
        format!("call-{}", self.next_call)
    }
}

/// Normalized item type: lowercased, alphanumerics only, so
/// `agent_message`, `agentMessage`, and `agent.message` all dispatch the
/// same way.
fn normalized_item_type(item: &Value) -> String {
    item.get("type")
        .or_else(|| item.get("item_type"))
        .or_else(|| item.get("itemType"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let texts: Vec<String> = parts
                .iter()
                .filter_map(|p| {
                    p.get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| p.as_str().map(str::to_string))
                })
                .collect();
            if texts.is_empty() {
                value.to_string()
            } else {
                texts.join("\n")
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_started_allocates_a_turn_id() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({"type": "turn.started"}));
        match &events[0] {
            CanonicalEvent::TaskStarted { turn_id: Some(id) } => {
                assert_eq!(mapper.current_turn_id(), Some(id.as_str()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn backend_turn_id_wins_over_allocation() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({"type": "turn.started", "turn_id": "t-real"}));
        assert_eq!(
            events,
            vec![CanonicalEvent::TaskStarted {
                turn_id: Some("t-real".to_string())
            }]
        );
    }

    #[test]
    fn turn_completed_emits_token_count_before_terminal() {
        let mut mapper = SdkEventMapper::new();
        let _ = mapper.map(&json!({"type": "turn.started"}));
        let events = mapper.map(&json!({
            "type": "turn.completed",
            "usage": {"input_tokens": 12, "output_tokens": 34}
        }));
        assert_eq!(events.len(), 2);
        match &events[0] {
            CanonicalEvent::TokenCount { info: Some(info) } => {
                assert_eq!(info.input_tokens, 12);
                assert_eq!(info.output_tokens, 34);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events[1], CanonicalEvent::TaskComplete { .. }));
    }

    #[test]
    fn turn_completed_status_translation_matches_app_server() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({"type": "turn.completed", "status": "interrupted"}));
        assert!(matches!(events[0], CanonicalEvent::TurnAborted { .. }));

        let events = mapper.map(&json!({"type": "turn.completed", "status": "failed"}));
        assert!(matches!(events[0], CanonicalEvent::TaskFailed { .. }));
    }

    #[test]
    fn aborted_spellings_all_map_to_turn_aborted() {
        for t in [
            "turn.aborted",
            "turn.interrupted",
            "turn.cancelled",
            "turn.canceled",
        ] {
            let mut mapper = SdkEventMapper::new();
            let _ = mapper.map(&json!({"type": "turn.started", "turn_id": "t1"}));
            let events = mapper.map(&json!({"type": t}));
            assert_eq!(
                events,
                vec![CanonicalEvent::TurnAborted {
                    turn_id: Some("t1".to_string())
                }],
                "for {}",
                t
            );
        }
    }

    #[test]
    fn retryable_stream_error_is_suppressed() {
        let mut mapper = SdkEventMapper::new();
        assert!(mapper
            .map(&json!({"type": "stream.error", "message": "x", "retryable": true}))
            .is_empty());
        let events = mapper.map(&json!({"type": "stream.error", "message": "gone"}));
        assert!(matches!(events[0], CanonicalEvent::StreamError { .. }));
    }

    #[test]
    fn error_preserves_additional_details() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "error",
            "message": "bad",
            "additional_details": {"hint": "retry later"}
        }));
        match &events[0] {
            CanonicalEvent::Error {
                message,
                additional_details,
                ..
            } => {
                assert_eq!(message, "bad");
                assert_eq!(additional_details.as_ref().unwrap()["hint"], "retry later");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn approval_request_allocates_call_id_when_absent() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "exec_approval_request",
            "command": "rm -rf /tmp/safe",
            "cwd": "/tmp"
        }));
        match &events[0] {
            CanonicalEvent::ExecApprovalRequest {
                call_id,
                command,
                cwd,
                ..
            } => {
                assert!(!call_id.is_empty());
                assert_eq!(command.as_deref(), Some("rm -rf /tmp/safe"));
                assert_eq!(cwd.as_deref(), Some("/tmp"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn approval_request_keeps_provided_call_id() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "approval.requested",
            "call_id": "approve-42",
            "command": "rm -rf /tmp/safe"
        }));
        match &events[0] {
            CanonicalEvent::ExecApprovalRequest { call_id, .. } => {
                assert_eq!(call_id, "approve-42");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn second_reasoning_item_emits_one_section_break() {
        let mut mapper = SdkEventMapper::new();
        let _ = mapper.map(&json!({"type": "turn.started"}));
        let events =
            mapper.map(&json!({"type": "item.started", "item": {"id": "r1", "type": "reasoning"}}));
        assert!(events.is_empty(), "first reasoning item has no break");

        let events =
            mapper.map(&json!({"type": "item.started", "item": {"id": "r2", "type": "reasoning"}}));
        assert_eq!(events, vec![CanonicalEvent::AgentReasoningSectionBreak]);

        // Repeat start of a seen id does not break again.
        let events =
            mapper.map(&json!({"type": "item.started", "item": {"id": "r2", "type": "reasoning"}}));
        assert!(events.is_empty());
    }

    #[test]
    fn seen_reasoning_ids_reset_on_turn_started() {
        let mut mapper = SdkEventMapper::new();
        let _ = mapper.map(&json!({"type": "turn.started"}));
        let _ =
            mapper.map(&json!({"type": "item.started", "item": {"id": "r1", "type": "reasoning"}}));
        let _ = mapper.map(&json!({"type": "turn.completed"}));
        let _ = mapper.map(&json!({"type": "turn.started"}));
        let events =
            mapper.map(&json!({"type": "item.started", "item": {"id": "r9", "type": "reasoning"}}));
        assert!(events.is_empty(), "new turn starts with a clean seen set");
    }

    #[test]
    fn reasoning_updates_emit_prefix_extension_deltas() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "r1", "type": "reasoning", "text": "**Plan"}
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentReasoningDelta {
                delta: "**Plan".to_string()
            }]
        );
        let events = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "r1", "type": "reasoning", "text": "**Plan** draft plan"}
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentReasoningDelta {
                delta: "** draft plan".to_string()
            }]
        );
    }

    #[test]
    fn non_extension_updates_emit_nothing() {
        let mut mapper = SdkEventMapper::new();
        let _ = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "r1", "type": "reasoning", "text": "abcdef"}
        }));
        // Same text again: not a strict extension.
        assert!(mapper
            .map(&json!({
                "type": "item.updated",
                "item": {"id": "r1", "type": "reasoning", "text": "abcdef"}
            }))
            .is_empty());
        // Divergent text: ignored.
        assert!(mapper
            .map(&json!({
                "type": "item.updated",
                "item": {"id": "r1", "type": "reasoning", "text": "XYZ"}
            }))
            .is_empty());
    }

    #[test]
    fn reasoning_completed_emits_full_text_and_drops_buffer() {
        let mut mapper = SdkEventMapper::new();
        let _ = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "r1", "type": "reasoning", "text": "partial"}
        }));
        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {"id": "r1", "type": "reasoning", "text": "partial and final"}
        }));
        assert_eq!(
            events,
            vec![CanonicalEvent::AgentReasoning {
                text: "partial and final".to_string()
            }]
        );
        assert!(mapper.reasoning_buffers.is_empty());
    }

    #[test]
    fn command_execution_roundtrip() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.started",
            "item": {"id": "c1", "type": "command_execution", "command": "cargo check", "cwd": "/repo"}
        }));
        assert!(matches!(
            events[0],
            CanonicalEvent::ExecCommandBegin { .. }
        ));

        let _ = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "c1", "type": "command_execution", "aggregated_output": "Checking...\n"}
        }));

        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {"id": "c1", "type": "command_execution", "exit_code": 0}
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandEnd {
                command,
                output,
                exit_code,
                ..
            } => {
                assert_eq!(command.as_deref(), Some("cargo check"));
                assert_eq!(output.as_deref(), Some("Checking...\n"));
                assert_eq!(*exit_code, Some(0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn mcp_tool_call_synthesizes_label() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.started",
            "item": {"id": "m1", "type": "mcp_tool_call", "server": "hub", "tool": "search"}
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandBegin { command_label, .. } => {
                assert_eq!(command_label.as_deref(), Some("mcp:hub/search"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {
                "id": "m1",
                "type": "mcp_tool_call",
                "server": "hub",
                "tool": "search",
                "result": {"content": [{"type": "text", "text": "found it"}]},
                "status": "completed"
            }
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandEnd {
                command_label,
                output,
                status,
                ..
            } => {
                assert_eq!(command_label.as_deref(), Some("mcp:hub/search"));
                assert_eq!(output.as_deref(), Some("found it"));
                assert_eq!(status.as_deref(), Some("completed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn web_search_labels_and_output() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.started",
            "item": {"id": "w1", "type": "web_search", "query": "rust channels"}
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandBegin { command_label, .. } => {
                assert_eq!(command_label.as_deref(), Some("web_search rust channels"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {"id": "w1", "type": "web_search", "query": "rust channels"}
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandEnd { output, status, .. } => {
                assert_eq!(output.as_deref(), Some("Searched web: rust channels"));
                assert_eq!(status.as_deref(), Some("completed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn web_search_without_query_uses_generic_output() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {"id": "w1", "type": "web_search"}
        }));
        match &events[0] {
            CanonicalEvent::ExecCommandEnd {
                command_label,
                output,
                ..
            } => {
                assert_eq!(command_label.as_deref(), Some("web_search"));
                assert_eq!(output.as_deref(), Some("Web search completed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn todo_list_reads_items_or_todos() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.updated",
            "item": {"id": "p1", "type": "todo_list", "todos": [{"content": "verify e2e", "status": "in_progress", "priority": "high"}]}
        }));
        match &events[0] {
            CanonicalEvent::TodoList { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].content.as_deref(), Some("verify e2e"));
                assert_eq!(items[0].priority.as_deref(), Some("high"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn error_item_completed_becomes_error_event() {
        let mut mapper = SdkEventMapper::new();
        let events = mapper.map(&json!({
            "type": "item.completed",
            "item": {"id": "e1", "type": "error", "message": "tool crashed"}
        }));
        match &events[0] {
            CanonicalEvent::Error { message, .. } => assert_eq!(message, "tool crashed"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_events_map_to_nothing() {
        let mut mapper = SdkEventMapper::new();
        assert!(mapper.map(&json!({"type": "thread.archived"})).is_empty());
        assert!(mapper.map(&json!({"no_type": true})).is_empty());
    }
}
