//! Hub client seam.
//!
//! The hub link is a pre-existing client object from the relay's point of
//! view: something that accepts codex records, session events, and
//! agent-state updates, and lets us register RPC handlers for inbound
//! calls. The stdio implementation frames everything as JSON lines; the
//! wire protocol itself belongs to the hub, not to us.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_protocol::{AgentStateUpdate, HubRecord, SessionEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Inbound RPC handler. Handlers run inline on the reader task, so they
/// must be quick: push to a queue or a channel and return.
pub type RpcHandler = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Registry for inbound hub RPCs.
#[derive(Default)]
pub struct RpcHandlerManager {
    handlers: Mutex<HashMap<String, RpcHandler>>,
}

impl RpcHandlerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, method: impl Into<String>, handler: RpcHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.into(), handler);
    }

    pub fn deregister_handler(&self, method: &str) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(method);
    }

    pub fn deregister_all(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Dispatch an inbound call. `None` when no handler is registered.
    pub fn handle(&self, method: &str, params: Value) -> Option<Value> {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(method)
            .cloned();
        match handler {
            Some(handler) => Some(handler(params)),
            None => {
                debug!(component = "hub", method = %method, "No handler for RPC");
                None
            }
        }
    }
}

/// The hub connection consumed by the orchestrator.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn send_codex_message(&self, record: HubRecord);
    async fn send_session_event(&self, event: SessionEvent);
    async fn update_agent_state(&self, update: AgentStateUpdate);
}

/// JSON-lines hub link over this process's stdio.
pub struct StdioHub {
    outgoing_tx: mpsc::UnboundedSender<String>,
}

impl StdioHub {
    /// Start the writer and the stdin RPC reader.
    pub fn spawn(rpc: Arc<RpcHandlerManager>) -> Arc<Self> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(outgoing_rx));
        tokio::spawn(run_reader(rpc, outgoing_tx.clone()));
        Arc::new(Self { outgoing_tx })
    }

    fn send_line(&self, value: Value) {
        match serde_json::to_string(&value) {
            Ok(line) => {
                let _ = self.outgoing_tx.send(line);
            }
            Err(err) => warn!(component = "hub", error = %err, "Failed to encode hub line"),
        }
    }
}

#[async_trait]
impl HubClient for StdioHub {
    async fn send_codex_message(&self, record: HubRecord) {
        self.send_line(json!({"channel": "codex", "record": record}));
    }

    async fn send_session_event(&self, event: SessionEvent) {
        self.send_line(json!({"channel": "session", "event": event}));
    }

    async fn update_agent_state(&self, update: AgentStateUpdate) {
        self.send_line(json!({"channel": "agent_state", "update": update}));
    }
}

async fn run_writer(mut outgoing_rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = outgoing_rx.recv().await {
        if stdout.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        if stdout.write_all(b"\n").await.is_err() {
            return;
        }
        let _ = stdout.flush().await;
    }
}

async fn run_reader(rpc: Arc<RpcHandlerManager>, outgoing_tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(component = "hub", "Skipping unparseable hub line");
            continue;
        };
        let Some(method) = value.get("method").and_then(Value::as_str) else {
            continue;
        };
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        let result = rpc.handle(method, params);

        // Calls carrying an id get a reply line.
        if let Some(id) = value.get("id") {
            let reply = json!({"id": id, "result": result.unwrap_or(Value::Null)});
            if let Ok(line) = serde_json::to_string(&reply) {
                let _ = outgoing_tx.send(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_dispatch() {
        let rpc = RpcHandlerManager::new();
        rpc.register_handler(
            "echo",
            Arc::new(|params: Value| json!({"echoed": params})),
        );

        let result = rpc.handle("echo", json!("hi")).unwrap();
        assert_eq!(result["echoed"], "hi");
    }

    #[test]
    fn unknown_method_returns_none() {
        let rpc = RpcHandlerManager::new();
        assert!(rpc.handle("missing", Value::Null).is_none());
    }

    #[test]
    fn deregister_removes_handler() {
        let rpc = RpcHandlerManager::new();
        rpc.register_handler("once", Arc::new(|_| Value::Null));
        assert!(rpc.handle("once", Value::Null).is_some());

        rpc.deregister_handler("once");
        assert!(rpc.handle("once", Value::Null).is_none());
    }

    #[test]
    fn deregister_all_clears_everything() {
        let rpc = RpcHandlerManager::new();
        rpc.register_handler("a", Arc::new(|_| Value::Null));
        rpc.register_handler("b", Arc::new(|_| Value::Null));
        rpc.deregister_all();
        assert!(rpc.handle("a", Value::Null).is_none());
        assert!(rpc.handle("b", Value::Null).is_none());
    }
}
