//! Approval round-tripping.
//!
//! Correlates backend approval requests with hub decisions by id. Each
//! outstanding request surfaces at the hub as a synthetic tool call; the
//! decision comes back as the paired tool-call result and is injected into
//! the active transport. Abort drops the outstanding set, and decisions
//! arriving after that are discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use relay_protocol::{ApprovalDecision, ApprovalRequest, HubRecord, ToolCallStatus};
use serde_json::json;
use tracing::debug;

use crate::hub::HubClient;

pub struct PermissionHandler {
    hub: Arc<dyn HubClient>,
    outstanding: Mutex<HashMap<String, ApprovalRequest>>,
}

impl PermissionHandler {
    pub fn new(hub: Arc<dyn HubClient>) -> Self {
        Self {
            hub,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// A transport asked for approval: track it and surface a synthetic
    /// tool call at the hub.
    pub async fn on_request(&self, request: ApprovalRequest) {
        let record = HubRecord::tool_call(
            request.id.clone(),
            request.tool_name.clone(),
            json!({
                "tool": request.input.tool,
                "message": request.input.message,
                "command": request.input.command,
                "cwd": request.input.cwd,
            }),
        );
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.id.clone(), request);
        self.hub.send_codex_message(record).await;
    }

    /// The hub answered. Returns the original request when it is still
    /// outstanding; late decisions (after a reset) return `None` and have
    /// no effect.
    pub async fn on_complete(
        &self,
        id: &str,
        decision: &ApprovalDecision,
    ) -> Option<ApprovalRequest> {
        let request = self
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        let Some(request) = request else {
            debug!(component = "permissions", approval_id = %id, "Discarding late decision");
            return None;
        };

        let status = if decision.approved {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Denied
        };
        let record = HubRecord::tool_call_result(
            id,
            status,
            json!({
                "decision": decision.decision,
                "reason": decision.reason,
                "approved": decision.approved,
            }),
        );
        self.hub.send_codex_message(record).await;
        Some(request)
    }

    /// Drop all outstanding requests (turn abort).
    pub fn reset(&self) {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_protocol::{AgentStateUpdate, ApprovalInput, SessionEvent};

    #[derive(Default)]
    struct RecordingHub {
        records: Mutex<Vec<HubRecord>>,
    }

    #[async_trait]
    impl HubClient for RecordingHub {
        async fn send_codex_message(&self, record: HubRecord) {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record);
        }
        async fn send_session_event(&self, _event: SessionEvent) {}
        async fn update_agent_state(&self, _update: AgentStateUpdate) {}
    }

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.to_string(),
            tool_name: "Bash".to_string(),
            input: ApprovalInput {
                command: Some("rm -rf /tmp/safe".to_string()),
                cwd: Some("/tmp".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn request_then_decision_round_trips() {
        let hub = Arc::new(RecordingHub::default());
        let handler = PermissionHandler::new(hub.clone());

        handler.on_request(request("req-1")).await;
        assert_eq!(handler.outstanding_count(), 1);

        let decision = ApprovalDecision::from_decision("approved", None);
        let original = handler.on_complete("req-1", &decision).await;
        assert!(original.is_some());
        assert_eq!(handler.outstanding_count(), 0);

        let records = hub.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            HubRecord::ToolCall { call_id, name, input, .. } => {
                assert_eq!(call_id, "req-1");
                assert_eq!(name, "Bash");
                assert_eq!(input["command"], "rm -rf /tmp/safe");
            }
            other => panic!("unexpected record: {:?}", other),
        }
        match &records[1] {
            HubRecord::ToolCallResult {
                call_id, status, ..
            } => {
                assert_eq!(call_id, "req-1");
                assert_eq!(*status, ToolCallStatus::Completed);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn denied_decision_marks_result_denied() {
        let hub = Arc::new(RecordingHub::default());
        let handler = PermissionHandler::new(hub.clone());

        handler.on_request(request("req-2")).await;
        let decision = ApprovalDecision::from_decision("denied", Some("too risky".to_string()));
        handler.on_complete("req-2", &decision).await;

        let records = hub.records.lock().unwrap();
        match &records[1] {
            HubRecord::ToolCallResult { status, output, .. } => {
                assert_eq!(*status, ToolCallStatus::Denied);
                assert_eq!(output["reason"], "too risky");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn decision_after_reset_is_discarded() {
        let hub = Arc::new(RecordingHub::default());
        let handler = PermissionHandler::new(hub.clone());

        handler.on_request(request("req-3")).await;
        handler.reset();
        assert_eq!(handler.outstanding_count(), 0);

        let decision = ApprovalDecision::from_decision("approved", None);
        assert!(handler.on_complete("req-3", &decision).await.is_none());

        // Only the original tool call was forwarded, never a result.
        let records = hub.records.lock().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_discarded() {
        let hub = Arc::new(RecordingHub::default());
        let handler = PermissionHandler::new(hub.clone());
        let decision = ApprovalDecision::from_decision("approved", None);
        assert!(handler.on_complete("nope", &decision).await.is_none());
    }
}
