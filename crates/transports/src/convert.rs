//! App-server dialect converter.
//!
//! Translates `codex app-server` JSON-RPC notifications (`turn/*`, `item/*`,
//! `thread/*`, `codex/event/*`) into canonical events. Holds the per-item
//! accumulators: agent-message and command-output buffers, reasoning ids,
//! command and file-change meta carried from `item/started` to
//! `item/completed`.

use std::collections::{BTreeMap, HashMap, HashSet};

use relay_protocol::events::{CanonicalEvent, TodoItem, TokenUsage};
use serde_json::Value;

use crate::envelope::normalize_event_type;

#[derive(Debug, Clone, Default)]
struct CommandMeta {
    command: Option<String>,
    cwd: Option<String>,
    auto_approved: Option<bool>,
    label: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FileChangeMeta {
    changes: BTreeMap<String, Value>,
    auto_approved: Option<bool>,
}

/// Stateful converter for one session. Reset between turns is not needed;
/// reset on abort/session restart discards any half-open item state.
#[derive(Default)]
pub struct AppServerConverter {
    message_buffers: HashMap<String, String>,
    reasoning_buffers: HashMap<String, String>,
    seen_reasoning: HashSet<String>,
    command_meta: HashMap<String, CommandMeta>,
    command_output: HashMap<String, String>,
    file_changes: HashMap<String, FileChangeMeta>,
}

impl AppServerConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all per-item state.
    pub fn reset(&mut self) {
        self.message_buffers.clear();
        self.reasoning_buffers.clear();
        self.seen_reasoning.clear();
        self.command_meta.clear();
        self.command_output.clear();
        self.file_changes.clear();
    }

    /// Translate one JSON-RPC notification into zero or more canonical
    /// events. Unknown methods map to nothing.
    pub fn handle_notification(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        match method {
            "thread/started" | "thread/resumed" => {
                match str_field(params, &["thread_id", "threadId"]) {
                    Some(thread_id) => vec![CanonicalEvent::ThreadStarted { thread_id }],
                    None => Vec::new(),
                }
            }

            "turn/started" => {
                self.seen_reasoning.clear();
                vec![CanonicalEvent::TaskStarted {
                    turn_id: str_field(params, &["turn_id", "turnId"]),
                }]
            }

            "turn/completed" => {
                let turn_id = str_field(params, &["turn_id", "turnId"]);
                let status = str_field(params, &["status"]);
                let error = params
                    .get("error")
                    .map(error_text)
                    .or_else(|| str_field(params, &["message"]));
                vec![terminal_for_status(status.as_deref(), turn_id, error)]
            }

            "thread/status/changed" => self.handle_thread_status(params),

            "turn/diff/updated" => match str_field(params, &["unified_diff", "unifiedDiff", "diff"])
            {
                Some(unified_diff) => vec![CanonicalEvent::TurnDiff { unified_diff }],
                None => Vec::new(),
            },

            "thread/tokenUsage/updated" => {
                let info = params
                    .get("info")
                    .or_else(|| params.get("usage"))
                    .or(Some(params))
                    .and_then(TokenUsage::from_value);
                vec![CanonicalEvent::TokenCount { info }]
            }

            "error" | "stream_error" => self.handle_error(method, params),

            "item/agentMessage/delta" => {
                if let (Some(id), Some(delta)) = (item_id(params), str_field(params, &["delta"])) {
                    self.message_buffers.entry(id).or_default().push_str(&delta);
                }
                Vec::new()
            }

            "item/reasoning/textDelta" | "item/reasoning/summaryTextDelta" => {
                let Some(delta) = str_field(params, &["delta"]) else {
                    return Vec::new();
                };
                let mut events = Vec::new();
                if let Some(id) = item_id(params) {
                    // A second or later reasoning item in the same turn gets a
                    // section break before its first delta.
                    if !self.seen_reasoning.contains(&id) {
                        if !self.seen_reasoning.is_empty() {
                            events.push(CanonicalEvent::AgentReasoningSectionBreak);
                        }
                        self.seen_reasoning.insert(id.clone());
                    }
                    self.reasoning_buffers
                        .entry(id)
                        .or_default()
                        .push_str(&delta);
                }
                events.push(CanonicalEvent::AgentReasoningDelta { delta });
                events
            }

            "item/reasoning/summaryPartAdded" => {
                vec![CanonicalEvent::AgentReasoningSectionBreak]
            }

            "item/commandExecution/outputDelta" => {
                if let (Some(id), Some(delta)) = (item_id(params), str_field(params, &["delta"])) {
                    self.command_output.entry(id).or_default().push_str(&delta);
                }
                Vec::new()
            }

            "item/started" => self.handle_item_started(params),
            "item/completed" => self.handle_item_completed(params),

            _ => {
                if method == "codex/event" || method.starts_with("codex/event/") {
                    return self.handle_codex_event(method, params);
                }
                Vec::new()
            }
        }
    }

    fn handle_thread_status(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let status = params.get("status").cloned().unwrap_or(Value::Null);
        let status_type = status
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if status_type == "systemError" {
            let message = status
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("system error")
                .to_string();
            return vec![CanonicalEvent::Error {
                message,
                thread_id: str_field(params, &["thread_id", "threadId"]),
                turn_id: str_field(params, &["turn_id", "turnId"]),
                additional_details: status
                    .get("additional_details")
                    .or_else(|| status.get("additionalDetails"))
                    .cloned(),
            }];
        }
        if status_type.is_empty() {
            return Vec::new();
        }
        vec![terminal_for_status(
            Some(&status_type),
            str_field(params, &["turn_id", "turnId"]),
            None,
        )]
    }

    fn handle_error(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        if truthy(params.get("will_retry")) || truthy(params.get("willRetry")) {
            // The backend retries internally; nothing reaches the canonical
            // stream.
            return Vec::new();
        }
        let message = str_field(params, &["message", "error"]).unwrap_or_else(|| method.to_string());
        let additional_details = params
            .get("additional_details")
            .or_else(|| params.get("additionalDetails"))
            .cloned();
        if method == "stream_error" {
            vec![CanonicalEvent::StreamError {
                message,
                additional_details,
            }]
        } else {
            vec![CanonicalEvent::Error {
                message,
                thread_id: str_field(params, &["thread_id", "threadId"]),
                turn_id: str_field(params, &["turn_id", "turnId"]),
                additional_details,
            }]
        }
    }

    fn handle_item_started(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let Some(item) = params.get("item") else {
            return Vec::new();
        };
        let call_id = item_id(params).unwrap_or_else(relay_protocol::new_id);
        match item_type(item).as_str() {
            "commandexecution" => {
                let meta = CommandMeta {
                    command: command_text(item),
                    cwd: str_field(item, &["cwd"]),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                    label: None,
                };
                let event = CanonicalEvent::ExecCommandBegin {
                    call_id: call_id.clone(),
                    command: meta.command.clone(),
                    cwd: meta.cwd.clone(),
                    auto_approved: meta.auto_approved,
                    command_label: None,
                };
                self.command_meta.insert(call_id, meta);
                vec![event]
            }
            "filechange" => {
                let meta = FileChangeMeta {
                    changes: changes_map(item),
                    auto_approved: item
                        .get("auto_approved")
                        .or_else(|| item.get("autoApproved"))
                        .and_then(Value::as_bool),
                };
                let event = CanonicalEvent::PatchApplyBegin {
                    call_id: call_id.clone(),
                    changes: meta.changes.clone(),
                    auto_approved: meta.auto_approved,
                };
                self.file_changes.insert(call_id, meta);
                vec![event]
            }
            _ => Vec::new(),
        }
    }

    fn handle_item_completed(&mut self, params: &Value) -> Vec<CanonicalEvent> {
        let Some(item) = params.get("item") else {
            return Vec::new();
        };
        let call_id = item_id(params).unwrap_or_default();
        match item_type(item).as_str() {
            "agentmessage" => {
                let buffered = self.message_buffers.remove(&call_id);
                let message = str_field(item, &["text", "message"])
                    .or(buffered)
                    .unwrap_or_default();
                if message.is_empty() {
                    return Vec::new();
                }
                vec![CanonicalEvent::AgentMessage { message }]
            }
            "reasoning" => {
                let buffered = self.reasoning_buffers.remove(&call_id);
                let text = str_field(item, &["text", "summary"]).or(buffered);
                match text {
                    Some(text) if !text.is_empty() => vec![CanonicalEvent::AgentReasoning { text }],
                    _ => Vec::new(),
                }
            }
            "commandexecution" => {
                let meta = self.command_meta.remove(&call_id).unwrap_or_default();
                let buffered = self.command_output.remove(&call_id);
                let output = str_field(item, &["output", "aggregated_output", "aggregatedOutput"])
                    .or(buffered);
                vec![CanonicalEvent::ExecCommandEnd {
                    call_id,
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
            "filechange" => {
                let meta = self.file_changes.remove(&call_id).unwrap_or_default();
                let success = item
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or_else(|| {
                        str_field(item, &["status"]).as_deref() == Some("completed")
                    });
                vec![CanonicalEvent::PatchApplyEnd {
                    call_id,
                    success,
                    changes: meta.changes,
                    auto_approved: meta.auto_approved,
                    stdout: str_field(item, &["stdout"]),
                    stderr: str_field(item, &["stderr"]),
                    duration_ms: item
                        .get("duration_ms")
                        .or_else(|| item.get("durationMs"))
                        .and_then(Value::as_u64),
                }]
            }
            _ => Vec::new(),
        }
    }

    /// `codex/event` and `codex/event/<suffix>` wrap another event one or
    /// more levels deep. Unwrap `msg`/`event`/`payload`/`data` and recurse.
    fn handle_codex_event(&mut self, method: &str, params: &Value) -> Vec<CanonicalEvent> {
        let inner = params
            .get("msg")
            .or_else(|| params.get("event"))
            .or_else(|| params.get("payload"))
            .or_else(|| params.get("data"))
            .unwrap_or(params);

        // The suffix names the event when the payload itself doesn't.
        let suffix = method.strip_prefix("codex/event/").unwrap_or("");
        let inner_type = inner
            .get("type")
            .and_then(Value::as_str)
            .or_else(|| inner.get("method").and_then(Value::as_str))
            .unwrap_or(suffix);

        if inner_type.is_empty() {
            return Vec::new();
        }

        let normalized = normalize_event_type(inner_type);

        // Nested codex/event wrappers recurse until a direct shape appears.
        if normalized.starts_with("codex_event") || inner_type.starts_with("codex/event") {
            return self.handle_codex_event(inner_type, inner);
        }

        self.handle_direct_event(&normalized, inner)
    }

    /// Convert a bare event shape (already unwrapped and normalized) into a
    /// canonical event. Used for `codex/event` payloads and for MCP
    /// envelope payloads.
    pub fn handle_direct_event(&mut self, event_type: &str, payload: &Value) -> Vec<CanonicalEvent> {
        match event_type {
            "thread_started" | "session_configured" => {
                match str_field(payload, &["thread_id", "threadId", "session_id", "sessionId"]) {
                    Some(thread_id) => vec![CanonicalEvent::ThreadStarted { thread_id }],
                    None => Vec::new(),
                }
            }
            "task_started" | "turn_started" => {
                self.seen_reasoning.clear();
                vec![CanonicalEvent::TaskStarted {
                    turn_id: str_field(payload, &["turn_id", "turnId"]),
                }]
            }
            "task_complete" | "turn_completed" => {
                let turn_id = str_field(payload, &["turn_id", "turnId"]);
                let status = str_field(payload, &["status"]);
                vec![terminal_for_status(status.as_deref(), turn_id, None)]
            }
            "task_failed" => vec![CanonicalEvent::TaskFailed {
                turn_id: str_field(payload, &["turn_id", "turnId"]),
                error: payload
                    .get("error")
                    .map(error_text)
                    .or_else(|| str_field(payload, &["message"])),
            }],
            "turn_aborted" => vec![CanonicalEvent::TurnAborted {
                turn_id: str_field(payload, &["turn_id", "turnId"]),
            }],
            "error" | "stream_error" => self.handle_error(event_type, payload),
            "agent_message" => match str_field(payload, &["message", "text"]) {
                Some(message) => vec![CanonicalEvent::AgentMessage { message }],
                None => Vec::new(),
            },
            "agent_reasoning" => match str_field(payload, &["text", "message"]) {
                Some(text) => vec![CanonicalEvent::AgentReasoning { text }],
                None => Vec::new(),
            },
            "agent_reasoning_delta" => match str_field(payload, &["delta"]) {
                Some(delta) => vec![CanonicalEvent::AgentReasoningDelta { delta }],
                None => Vec::new(),
            },
            "agent_reasoning_section_break" => {
                vec![CanonicalEvent::AgentReasoningSectionBreak]
            }
            "exec_command_begin" => {
                let call_id = str_field(payload, &["call_id", "callId"])
                    .unwrap_or_else(relay_protocol::new_id);
                vec![CanonicalEvent::ExecCommandBegin {
                    call_id,
                    command: command_text(payload),
                    cwd: str_field(payload, &["cwd"]),
                    auto_approved: payload
                        .get("auto_approved")
                        .or_else(|| payload.get("autoApproved"))
                        .and_then(Value::as_bool),
                    command_label: None,
                }]
            }
            "exec_command_end" => {
                let call_id = str_field(payload, &["call_id", "callId"]).unwrap_or_default();
                vec![CanonicalEvent::ExecCommandEnd {
                    call_id,
                    command: command_text(payload),
                    command_label: None,
                    output: str_field(
                        payload,
                        &["output", "aggregated_output", "aggregatedOutput"],
                    ),
                    stderr: str_field(payload, &["stderr"]),
                    error: payload.get("error").map(error_text),
                    exit_code: payload
                        .get("exit_code")
                        .or_else(|| payload.get("exitCode"))
                        .and_then(Value::as_i64),
                    status: str_field(payload, &["status"]),
                    duration_ms: None,
                }]
            }
            "exec_approval_request" => {
                let call_id = str_field(payload, &["call_id", "callId"])
                    .unwrap_or_else(relay_protocol::new_id);
                vec![CanonicalEvent::ExecApprovalRequest {
                    call_id,
                    command: command_text(payload),
                    cwd: str_field(payload, &["cwd"]),
                    message: str_field(payload, &["message", "reason"]),
                    tool: str_field(payload, &["tool"]),
                }]
            }
            "patch_apply_begin" => {
                let call_id = str_field(payload, &["call_id", "callId"])
                    .unwrap_or_else(relay_protocol::new_id);
                vec![CanonicalEvent::PatchApplyBegin {
                    call_id,
                    changes: changes_map(payload),
                    auto_approved: payload
                        .get("auto_approved")
                        .or_else(|| payload.get("autoApproved"))
                        .and_then(Value::as_bool),
                }]
            }
            "patch_apply_end" => {
                let call_id = str_field(payload, &["call_id", "callId"]).unwrap_or_default();
                vec![CanonicalEvent::PatchApplyEnd {
                    call_id,
                    success: payload.get("success").and_then(Value::as_bool).unwrap_or(false),
                    changes: changes_map(payload),
                    auto_approved: payload
                        .get("auto_approved")
                        .or_else(|| payload.get("autoApproved"))
                        .and_then(Value::as_bool),
                    stdout: str_field(payload, &["stdout"]),
                    stderr: str_field(payload, &["stderr"]),
                    duration_ms: None,
                }]
            }
            "todo_list" => {
                // `entries` (the plan dialect) is echoed into `items` so
                // downstream consumers see one shape.
                let raw = payload
                    .get("items")
                    .or_else(|| payload.get("entries"))
                    .or_else(|| payload.get("plan"))
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                let items: Vec<TodoItem> = serde_json::from_value(raw).unwrap_or_default();
                vec![CanonicalEvent::TodoList { items }]
            }
            "turn_diff" => match str_field(payload, &["unified_diff", "unifiedDiff", "diff"]) {
                Some(unified_diff) => vec![CanonicalEvent::TurnDiff { unified_diff }],
                None => Vec::new(),
            },
            "token_count" => {
                let info = payload
                    .get("info")
                    .or_else(|| payload.get("usage"))
                    .or(Some(payload))
                    .and_then(TokenUsage::from_value);
                vec![CanonicalEvent::TokenCount { info }]
            }
            _ => Vec::new(),
        }
    }
}

/// Case-insensitive terminal-status translation shared by both dialects.
pub fn terminal_for_status(
    status: Option<&str>,
    turn_id: Option<String>,
    error: Option<String>,
) -> CanonicalEvent {
    let status = status.unwrap_or("completed").to_ascii_lowercase();
    match status.as_str() {
        "interrupted" | "cancelled" | "canceled" | "aborted" => {
            CanonicalEvent::TurnAborted { turn_id }
        }
        "failed" | "error" => CanonicalEvent::TaskFailed { turn_id, error },
        // `completed`, `complete`, `done`, and anything unrecognized.
        _ => CanonicalEvent::TaskComplete { turn_id },
    }
}

pub(crate) fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
        _ => false,
    }
}

/// Commands arrive as either a string or an argv array.
pub(crate) fn command_text(value: &Value) -> Option<String> {
    match value.get("command") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

pub(crate) fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn item_id(params: &Value) -> Option<String> {
    str_field(params, &["item_id", "itemId"]).or_else(|| {
        params
            .get("item")
            .and_then(|item| str_field(item, &["id", "item_id", "itemId"]))
    })
}

fn item_type(item: &Value) -> String {
    let raw = item
        .get("type")
        .or_else(|| item.get("item_type"))
        .or_else(|| item.get("itemType"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn changes_map(value: &Value) -> BTreeMap<String, Value> {
    value
        .get("changes")
        .and_then(Value::as_object)
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
