//! Canonical event model
//!
//! The single event vocabulary every transport adapter emits inward.
//! Adapters translate their backend's dialect into this set and nothing
//! else; unknown upstream shapes map to no event at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of an agent todo/plan list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Token usage reported by the backend for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub context_window: u64,
}

impl TokenUsage {
    /// Read usage out of a loosely-shaped JSON object, accepting both
    /// snake_case and camelCase spellings.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let pick = |keys: &[&str]| -> u64 {
            keys.iter()
                .find_map(|k| obj.get(*k))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Some(Self {
            input_tokens: pick(&["input_tokens", "inputTokens", "input"]),
            output_tokens: pick(&["output_tokens", "outputTokens", "output"]),
            cached_tokens: pick(&["cached_tokens", "cachedTokens", "cached_input_tokens"]),
            context_window: pick(&["context_window", "contextWindow", "model_context_window"]),
        })
    }
}

/// The canonical event stream.
///
/// This is the only contract between the transport adapters and the
/// orchestrator. Field spellings are snake_case on the wire regardless of
/// which dialect produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    ThreadStarted {
        thread_id: String,
    },
    TaskStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    TaskComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    TaskFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TurnAborted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    StreamError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_details: Option<Value>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_details: Option<Value>,
    },
    AgentMessage {
        message: String,
    },
    AgentReasoning {
        text: String,
    },
    AgentReasoningDelta {
        delta: String,
    },
    AgentReasoningSectionBreak,
    ExecCommandBegin {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_approved: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_label: Option<String>,
    },
    ExecCommandEnd {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    ExecApprovalRequest {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    PatchApplyBegin {
        call_id: String,
        #[serde(default)]
        changes: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_approved: Option<bool>,
    },
    PatchApplyEnd {
        call_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        changes: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_approved: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    TodoList {
        #[serde(default)]
        items: Vec<TodoItem>,
    },
    TurnDiff {
        unified_diff: String,
    },
    TokenCount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<TokenUsage>,
    },
}

impl CanonicalEvent {
    /// Wire name of this event, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            CanonicalEvent::ThreadStarted { .. } => "thread_started",
            CanonicalEvent::TaskStarted { .. } => "task_started",
            CanonicalEvent::TaskComplete { .. } => "task_complete",
            CanonicalEvent::TaskFailed { .. } => "task_failed",
            CanonicalEvent::TurnAborted { .. } => "turn_aborted",
            CanonicalEvent::StreamError { .. } => "stream_error",
            CanonicalEvent::Error { .. } => "error",
            CanonicalEvent::AgentMessage { .. } => "agent_message",
            CanonicalEvent::AgentReasoning { .. } => "agent_reasoning",
            CanonicalEvent::AgentReasoningDelta { .. } => "agent_reasoning_delta",
            CanonicalEvent::AgentReasoningSectionBreak => "agent_reasoning_section_break",
            CanonicalEvent::ExecCommandBegin { .. } => "exec_command_begin",
            CanonicalEvent::ExecCommandEnd { .. } => "exec_command_end",
            CanonicalEvent::ExecApprovalRequest { .. } => "exec_approval_request",
            CanonicalEvent::PatchApplyBegin { .. } => "patch_apply_begin",
            CanonicalEvent::PatchApplyEnd { .. } => "patch_apply_end",
            CanonicalEvent::TodoList { .. } => "todo_list",
            CanonicalEvent::TurnDiff { .. } => "turn_diff",
            CanonicalEvent::TokenCount { .. } => "token_count",
        }
    }

    /// Whether this event concludes a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::TaskComplete { .. }
                | CanonicalEvent::TaskFailed { .. }
                | CanonicalEvent::TurnAborted { .. }
        )
    }

    /// The turn id carried by this event, when present.
    pub fn turn_id(&self) -> Option<&str> {
        match self {
            CanonicalEvent::TaskStarted { turn_id }
            | CanonicalEvent::TaskComplete { turn_id }
            | CanonicalEvent::TaskFailed { turn_id, .. }
            | CanonicalEvent::TurnAborted { turn_id }
            | CanonicalEvent::Error { turn_id, .. } => turn_id.as_deref(),
            _ => None,
        }
    }
}
