//! MCP transport.
//!
//! Spawns `codex mcp-server` and drives turns through MCP tool calls: the
//! first message starts a session via the `codex` tool, later messages
//! continue it via `codex-reply`. Event notifications arrive wrapped in
//! `event_msg` / `response_item` envelopes and pass through the unwrapper
//! before the shared canonicalization. There is no interrupt on this
//! transport; abort only cancels the local wait.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use relay_protocol::{ApprovalDecision, CanonicalEvent};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::convert::{str_field, AppServerConverter};
use crate::envelope::unwrap_envelope;
use crate::rpc::{JsonRpcClient, ServerMessage};
use crate::throttle::{debug_unknown, DebugThrottle};
use crate::{EventSender, SessionConfig, Transport, TransportError, TransportKind};

const DEFAULT_CODEX_BIN: &str = "codex";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    codex_bin: PathBuf,
    events_tx: EventSender,
    client: Mutex<Option<Arc<JsonRpcClient>>>,
    converter: Mutex<AppServerConverter>,
    /// Outstanding approval requests: canonical call id → JSON-RPC id.
    approvals: Mutex<HashMap<String, Value>>,
    session_id: Mutex<Option<String>>,
    config: Mutex<Option<SessionConfig>>,
    turn_cancel: Mutex<Option<CancellationToken>>,
    throttle: DebugThrottle,
}

impl McpTransport {
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
                session_id: Mutex::new(None),
                config: Mutex::new(None),
                turn_cancel: Mutex::new(None),
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
impl Transport for McpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mcp
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let client = Arc::new(JsonRpcClient::spawn(
            &self.inner.codex_bin,
            &["mcp-server"],
            incoming_tx,
        )?);

        tokio::spawn(run_incoming_loop(Arc::clone(&self.inner), incoming_rx));

        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": {
                "name": "codex-relay",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        client.request("initialize", Some(params)).await?;
        client.notify("notifications/initialized", None).await?;

        *self.inner.client.lock().await = Some(client);
        info!(component = "mcp", "Connected to codex mcp-server");
        Ok(())
    }

    async fn start_thread(
        &self,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        *self.inner.config.lock().await = Some(config.clone());
        // The session starts with the first turn's `codex` tool call; its id
        // arrives as a canonical `thread_started` event.
        Ok(None)
    }

    async fn resume_thread(
        &self,
        _thread_id: &str,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        // MCP sessions cannot be resumed; fall back to a fresh session.
        self.start_thread(config).await
    }

    fn supports_resume(&self) -> bool {
        false
    }

    async fn start_turn(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let client = self.client().await?;
        let session_id = self.inner.session_id.lock().await.clone();
        let config = self
            .inner
            .config
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NoActiveThread)?;

        let params = match &session_id {
            None => json!({
                "name": "codex",
                "arguments": {
                    "prompt": input,
                    "cwd": config.cwd.to_string_lossy(),
                    "sandbox": config.sandbox_mode,
                    "approval-policy": config.approval_policy,
                    "model": config.model,
                },
            }),
            Some(session_id) => json!({
                "name": "codex-reply",
                "arguments": {
                    "sessionId": session_id,
                    "prompt": input,
                },
            }),
        };

        let turn_cancel = cancel.child_token();
        *self.inner.turn_cancel.lock().await = Some(turn_cancel.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = turn_cancel.cancelled() => {
                    // No interrupt on this transport; close the turn locally.
                    inner.converter.lock().await.reset();
                    let _ = inner
                        .events_tx
                        .send(CanonicalEvent::TurnAborted { turn_id: None })
                        .await;
                }
                res = client.request("tools/call", Some(params)) => {
                    if let Err(err) = res {
                        warn!(component = "mcp", error = %err, "Tool call failed");
                        let _ = inner
                            .events_tx
                            .send(CanonicalEvent::TaskFailed {
                                turn_id: None,
                                error: Some(err.to_string()),
                            })
                            .await;
                    }
                }
            }
        });
        Ok(())
    }

    async fn interrupt_turn(
        &self,
        _thread_id: Option<&str>,
        _turn_id: Option<&str>,
    ) -> Result<(), TransportError> {
        if let Some(cancel) = self.inner.turn_cancel.lock().await.take() {
            cancel.cancel();
        }
        Ok(())
    }

    async fn resolve_approval(
        &self,
        id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), TransportError> {
        let rpc_id = self.inner.approvals.lock().await.remove(id);
        let Some(rpc_id) = rpc_id else {
            debug!(component = "mcp", approval_id = %id, "Dropping late approval decision");
            return Ok(());
        };
        let client = self.client().await?;
        let action = if decision.approved { "accept" } else { "decline" };
        client
            .respond(
                rpc_id,
                json!({
                    "action": action,
                    "content": {"decision": decision.wire_decision()},
                }),
            )
            .await
    }

    async fn reset_stream_state(&self) {
        self.inner.converter.lock().await.reset();
        self.inner.approvals.lock().await.clear();
    }

    async fn clear_thread(&self) {
        *self.inner.session_id.lock().await = None;
        self.reset_stream_state().await;
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(cancel) = self.inner.turn_cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(client) = self.inner.client.lock().await.take() {
            client.shutdown().await;
        }
        Ok(())
    }
}

async fn run_incoming_loop(inner: Arc<Inner>, mut incoming_rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = incoming_rx.recv().await {
        match message {
            ServerMessage::Notification { method, params } => {
                let events = {
                    let mut converter = inner.converter.lock().await;
                    // Envelope-wrapped payloads normalize to a direct shape;
                    // everything else goes through the notification path.
                    match unwrap_envelope(&params) {
                        Some((event_type, payload)) => {
                            converter.handle_direct_event(&event_type, &payload)
                        }
                        None => converter.handle_notification(&method, &params),
                    }
                };
                if events.is_empty() && !method.starts_with("notifications/") {
                    debug_unknown(&inner.throttle, "mcp", &method);
                }
                for event in events {
                    if let CanonicalEvent::ThreadStarted { thread_id } = &event {
                        *inner.session_id.lock().await = Some(thread_id.clone());
                    }
                    if inner.events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            ServerMessage::Request { id, method, params } => {
                if !method.contains("elicitation") && !method.ends_with("requestApproval") {
                    debug_unknown(&inner.throttle, "mcp", &method);
                    continue;
                }
                let call_id = str_field(&params, &["codex_call_id", "call_id", "callId"])
                    .unwrap_or_else(relay_protocol::new_id);
                let event = CanonicalEvent::ExecApprovalRequest {
                    call_id: call_id.clone(),
                    command: str_field(&params, &["codex_command", "command"]),
                    cwd: str_field(&params, &["codex_cwd", "cwd"]),
                    message: str_field(&params, &["message", "reason"]),
                    tool: str_field(&params, &["tool"]),
                };
                inner.approvals.lock().await.insert(call_id, id);
                if inner.events_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
