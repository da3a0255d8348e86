//! Hub-facing payloads
//!
//! Everything the relay sends up to the hub: canonical events wrapped in an
//! id-carrying record, synthetic tool calls (approvals, reasoning sections),
//! session events, and agent-state deltas. The hub treats the records
//! opaquely; only the shapes here matter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::CanonicalEvent;

/// Completion status of a synthetic tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Completed,
    Canceled,
    Denied,
}

/// A record forwarded to the hub via `send_codex_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubRecord {
    /// A canonical event, verbatim.
    Event { id: String, event: CanonicalEvent },
    /// A synthetic tool call (approval prompt, reasoning section, plan).
    ToolCall {
        id: String,
        call_id: String,
        name: String,
        input: Value,
    },
    /// The paired result for a synthetic tool call.
    ToolCallResult {
        id: String,
        call_id: String,
        status: ToolCallStatus,
        output: Value,
    },
}

impl HubRecord {
    pub fn event(event: CanonicalEvent) -> Self {
        HubRecord::Event {
            id: crate::new_id(),
            event,
        }
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        HubRecord::ToolCall {
            id: crate::new_id(),
            call_id: call_id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_call_result(
        call_id: impl Into<String>,
        status: ToolCallStatus,
        output: Value,
    ) -> Self {
        HubRecord::ToolCallResult {
            id: crate::new_id(),
            call_id: call_id.into(),
            status,
            output,
        }
    }
}

/// Session-level events sent via `send_session_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The relay is idle and ready for the next message.
    Ready,
    /// A user-visible status line.
    Message { message: String },
}

/// Partial update to the hub-visible agent state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentStateUpdate {
    pub fn thinking(value: bool) -> Self {
        Self {
            thinking: Some(value),
            ..Default::default()
        }
    }
}

/// Kind tag for entries in the passive renderer's message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    Tool,
    Result,
    Status,
}

/// RPC methods the relay registers with the hub.
pub mod rpc {
    pub const ABORT: &str = "abort";
    pub const SWITCH_TO_LOCAL: &str = "switchToLocal";
    pub const USER_MESSAGE: &str = "userMessage";
    pub const APPROVE_COMMAND: &str = "approval/commandExecution";
    pub const APPROVE_FILE_CHANGE: &str = "approval/fileChange";
    pub const APPROVE_TOOL_INPUT: &str = "approval/toolInput";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_tags() {
        let json = serde_json::to_string(&SessionEvent::Ready).unwrap();
        assert_eq!(json, r#"{"type":"ready"}"#);

        let json = serde_json::to_string(&SessionEvent::Message {
            message: "hi".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"message""#));
    }

    #[test]
    fn hub_record_event_gets_an_id() {
        let record = HubRecord::event(CanonicalEvent::TaskStarted { turn_id: None });
        match record {
            HubRecord::Event { id, .. } => assert!(!id.is_empty()),
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn tool_call_roundtrip() {
        let record = HubRecord::tool_call(
            "call-7",
            "CodexReasoning",
            serde_json::json!({"section": 1}),
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: HubRecord = serde_json::from_str(&json).unwrap();
        match parsed {
            HubRecord::ToolCall { call_id, name, .. } => {
                assert_eq!(call_id, "call-7");
                assert_eq!(name, "CodexReasoning");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn agent_state_update_omits_unset_fields() {
        let json = serde_json::to_string(&AgentStateUpdate::thinking(true)).unwrap();
        assert!(json.contains("thinking"));
        assert!(!json.contains("permission_mode"));
        assert!(!json.contains("model"));
    }
}
