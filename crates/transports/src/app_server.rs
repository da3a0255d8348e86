//! App-server transport.
//!
//! Spawns `codex app-server` and speaks line-delimited JSON-RPC with it.
//! Notifications feed the app-server converter; server-initiated approval
//! requests surface as `exec_approval_request` canonical events and are
//! answered on the wire once the hub's decision comes back.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use relay_protocol::{ApprovalDecision, CanonicalEvent};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::convert::{command_text, str_field, AppServerConverter};
use crate::rpc::{JsonRpcClient, ServerMessage};
use crate::throttle::{debug_unknown, DebugThrottle};
use crate::{EventSender, SessionConfig, Transport, TransportError, TransportKind};

const DEFAULT_CODEX_BIN: &str = "codex";

const METHOD_REQUEST_COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
const METHOD_REQUEST_FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
const METHOD_REQUEST_USER_INPUT: &str = "item/tool/requestUserInput";

pub struct AppServerTransport {
    inner: Arc<Inner>,
}

struct Inner {
    codex_bin: PathBuf,
    events_tx: EventSender,
    client: Mutex<Option<Arc<JsonRpcClient>>>,
    converter: Mutex<AppServerConverter>,
    /// Outstanding approval requests: canonical call id → JSON-RPC id.
    approvals: Mutex<HashMap<String, Value>>,
    thread_id: Mutex<Option<String>>,
    throttle: DebugThrottle,
}

impl AppServerTransport {
    pub fn new(events_tx: EventSender) -> Self {
        Self::with_binary(PathBuf::from(DEFAULT_CODEX_BIN), events_tx)
    }

    pub fn with_binary(codex_bin: PathBuf, events_tx: EventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                codex_bin,
                events_tx,
                client: Mutex::new(None),
                converter: Mutex::new(AppServerConverter::new()),
                approvals: Mutex::new(HashMap::new()),
                thread_id: Mutex::new(None),
                throttle: DebugThrottle::default(),
            }),
        }
    }

    async fn client(&self) -> Result<Arc<JsonRpcClient>, TransportError> {
        self.inner
            .client
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for AppServerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::AppServer
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let client = Arc::new(JsonRpcClient::spawn(
            &self.inner.codex_bin,
            &["app-server"],
            incoming_tx,
        )?);

        tokio::spawn(run_incoming_loop(
            Arc::clone(&self.inner),
            Arc::clone(&client),
            incoming_rx,
        ));

        let params = json!({
            "clientInfo": {
                "name": "codex-relay",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        client.request("initialize", Some(params)).await?;
        client.notify("initialized", None).await?;

        *self.inner.client.lock().await = Some(client);
        info!(component = "app_server", "Connected to codex app-server");
        Ok(())
    }

    async fn start_thread(
        &self,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        let client = self.client().await?;
        let params = thread_params(config, None);
        let result = client.request("thread/start", Some(params)).await?;
        let thread_id = extract_thread_id("thread/start", &result)?;
        *self.inner.thread_id.lock().await = Some(thread_id.clone());
        Ok(Some(thread_id))
    }

    async fn resume_thread(
        &self,
        thread_id: &str,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        let client = self.client().await?;
        let params = thread_params(config, Some(thread_id));
        let result = client.request("thread/resume", Some(params)).await?;
        let resolved = extract_thread_id("thread/resume", &result)
            .unwrap_or_else(|_| thread_id.to_string());
        *self.inner.thread_id.lock().await = Some(resolved.clone());
        Ok(Some(resolved))
    }

    async fn start_turn(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let client = self.client().await?;
        let thread_id = self
            .inner
            .thread_id
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NoActiveThread)?;

        let params = json!({
            "threadId": thread_id,
            "input": [{"type": "text", "text": input}],
        });

        tokio::select! {
            res = client.request("turn/start", Some(params)) => res.map(|_| ()),
            _ = cancel.cancelled() => Err(TransportError::Interrupted),
        }
    }

    async fn interrupt_turn(
        &self,
        thread_id: Option<&str>,
        turn_id: Option<&str>,
    ) -> Result<(), TransportError> {
        let (Some(thread_id), Some(turn_id)) = (thread_id, turn_id) else {
            debug!(
                component = "app_server",
                "Interrupt without thread/turn id, nothing to do"
            );
            return Ok(());
        };
        let client = self.client().await?;
        let params = json!({"threadId": thread_id, "turnId": turn_id});
        client.request("turn/interrupt", Some(params)).await?;
        Ok(())
    }

    async fn resolve_approval(
        &self,
        id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), TransportError> {
        let rpc_id = self.inner.approvals.lock().await.remove(id);
        let Some(rpc_id) = rpc_id else {
            // Late decision after a reset; discard silently.
            debug!(component = "app_server", approval_id = %id, "Dropping late approval decision");
            return Ok(());
        };
        let client = self.client().await?;
        client
            .respond(rpc_id, json!({"decision": decision.wire_decision()}))
            .await
    }

    async fn reset_stream_state(&self) {
        self.inner.converter.lock().await.reset();
        self.inner.approvals.lock().await.clear();
    }

    async fn clear_thread(&self) {
        *self.inner.thread_id.lock().await = None;
        self.reset_stream_state().await;
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(client) = self.inner.client.lock().await.take() {
            client.shutdown().await;
        }
        Ok(())
    }
}

async fn run_incoming_loop(
    inner: Arc<Inner>,
    client: Arc<JsonRpcClient>,
    mut incoming_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = incoming_rx.recv().await {
        match message {
            ServerMessage::Notification { method, params } => {
                let events = inner
                    .converter
                    .lock()
                    .await
                    .handle_notification(&method, &params);
                if events.is_empty() && !is_known_method(&method) {
                    debug_unknown(&inner.throttle, "app_server", &method);
                }
                for event in events {
                    if inner.events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            ServerMessage::Request { id, method, params } => {
                let Some(event) = approval_event(&method, &params) else {
                    // Unknown server request: answer it so the backend does
                    // not hang waiting on us.
                    let _ = client.respond(id, json!({})).await;
                    debug_unknown(&inner.throttle, "app_server", &method);
                    continue;
                };
                if let CanonicalEvent::ExecApprovalRequest { call_id, .. } = &event {
                    inner
                        .approvals
                        .lock()
                        .await
                        .insert(call_id.clone(), id.clone());
                }
                if inner.events_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn is_known_method(method: &str) -> bool {
    method.starts_with("thread/")
        || method.starts_with("turn/")
        || method.starts_with("item/")
        || method == "codex/event"
        || method.starts_with("codex/event/")
        || method == "error"
        || method == "stream_error"
}

/// Build the canonical approval event for a server-initiated request.
fn approval_event(method: &str, params: &Value) -> Option<CanonicalEvent> {
    let call_id = str_field(params, &["call_id", "callId", "item_id", "itemId"])
        .unwrap_or_else(relay_protocol::new_id);
    match method {
        METHOD_REQUEST_COMMAND_APPROVAL => Some(CanonicalEvent::ExecApprovalRequest {
            call_id,
            command: command_text(params),
            cwd: str_field(params, &["cwd"]),
            message: str_field(params, &["reason", "message"]),
            tool: Some("Bash".to_string()),
        }),
        METHOD_REQUEST_FILE_CHANGE_APPROVAL => Some(CanonicalEvent::ExecApprovalRequest {
            call_id,
            command: None,
            cwd: str_field(params, &["cwd"]),
            message: str_field(params, &["reason", "message"])
                .or_else(|| file_change_summary(params)),
            tool: Some("Edit".to_string()),
        }),
        METHOD_REQUEST_USER_INPUT => Some(CanonicalEvent::ExecApprovalRequest {
            call_id,
            command: None,
            cwd: None,
            message: str_field(params, &["prompt", "question", "message"]),
            tool: Some("UserInput".to_string()),
        }),
        _ => None,
    }
}

fn file_change_summary(params: &Value) -> Option<String> {
    let changes = params.get("changes")?.as_object()?;
    if changes.is_empty() {
        return None;
    }
    Some(changes.keys().cloned().collect::<Vec<_>>().join(", "))
}

fn thread_params(config: &SessionConfig, thread_id: Option<&str>) -> Value {
    let mut params = json!({
        "cwd": config.cwd.to_string_lossy(),
        "approvalPolicy": config.approval_policy,
        "sandboxMode": config.sandbox_mode,
    });
    if let Some(thread_id) = thread_id {
        params["threadId"] = json!(thread_id);
    }
    if let Some(model) = &config.model {
        params["model"] = json!(model);
    }
    if let Some(effort) = &config.reasoning_effort {
        params["reasoningEffort"] = json!(effort);
    }
    if !config.mcp_servers.is_empty() {
        params["mcpServers"] = json!(config.mcp_servers);
    }
    params
}

fn extract_thread_id(method: &str, result: &Value) -> Result<String, TransportError> {
    result
        .get("thread")
        .and_then(|t| t.get("id"))
        .or_else(|| result.get("threadId"))
        .or_else(|| result.get("thread_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransportError::MissingThreadId {
            method: method.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approval_event_for_command_request() {
        let event = approval_event(
            METHOD_REQUEST_COMMAND_APPROVAL,
            &json!({"callId": "c9", "command": "rm -rf tmp", "cwd": "/repo"}),
        )
        .unwrap();
        match event {
            CanonicalEvent::ExecApprovalRequest {
                call_id,
                command,
                cwd,
                tool,
                ..
            } => {
                assert_eq!(call_id, "c9");
                assert_eq!(command.as_deref(), Some("rm -rf tmp"));
                assert_eq!(cwd.as_deref(), Some("/repo"));
                assert_eq!(tool.as_deref(), Some("Bash"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn approval_event_for_file_change_lists_paths() {
        let event = approval_event(
            METHOD_REQUEST_FILE_CHANGE_APPROVAL,
            &json!({"itemId": "f1", "changes": {"a.rs": {}, "b.rs": {}}}),
        )
        .unwrap();
        match event {
            CanonicalEvent::ExecApprovalRequest { message, tool, .. } => {
                assert_eq!(message.as_deref(), Some("a.rs, b.rs"));
                assert_eq!(tool.as_deref(), Some("Edit"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn approval_event_allocates_call_id_when_missing() {
        let event = approval_event(METHOD_REQUEST_USER_INPUT, &json!({"prompt": "Pick one"}));
        match event.unwrap() {
            CanonicalEvent::ExecApprovalRequest {
                call_id,
                message,
                tool,
                ..
            } => {
                assert!(!call_id.is_empty());
                assert_eq!(message.as_deref(), Some("Pick one"));
                assert_eq!(tool.as_deref(), Some("UserInput"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_request_methods_produce_no_event() {
        assert!(approval_event("some/other/request", &json!({})).is_none());
    }

    #[test]
    fn thread_params_include_mode_and_overrides() {
        let config = SessionConfig {
            cwd: "/work".into(),
            model: Some("gpt-5".to_string()),
            reasoning_effort: Some("high".to_string()),
            approval_policy: "on-request".to_string(),
            sandbox_mode: "workspace-write".to_string(),
            mcp_servers: Default::default(),
        };
        let params = thread_params(&config, Some("thr_1"));
        assert_eq!(params["threadId"], "thr_1");
        assert_eq!(params["approvalPolicy"], "on-request");
        assert_eq!(params["sandboxMode"], "workspace-write");
        assert_eq!(params["model"], "gpt-5");
        assert_eq!(params["reasoningEffort"], "high");
        assert!(params.get("mcpServers").is_none());
    }

    #[test]
    fn extract_thread_id_accepts_both_shapes() {
        let nested = json!({"thread": {"id": "thr_a"}});
        let flat = json!({"threadId": "thr_b"});
        assert_eq!(extract_thread_id("t", &nested).unwrap(), "thr_a");
        assert_eq!(extract_thread_id("t", &flat).unwrap(), "thr_b");
        assert!(extract_thread_id("t", &json!({})).is_err());
    }
}
