//! Codex Relay Protocol
//!
//! Shared types for the relay: the canonical event stream every transport
//! adapter emits, session and permission types, and the hub-facing payloads.
//! These types are serialized as JSON.

use uuid::Uuid;

pub mod events;
pub mod hub;
pub mod types;

pub use events::{CanonicalEvent, TodoItem, TokenUsage};
pub use hub::{AgentStateUpdate, HubRecord, MessageKind, SessionEvent, ToolCallStatus};
pub use types::{
    ApprovalDecision, ApprovalInput, ApprovalRequest, CodexCliOverrides, EnhancedMode,
    PermissionMode, ReasoningEffort,
};

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
