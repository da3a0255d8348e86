//! Line-delimited JSON-RPC over a child process's stdio.
//!
//! Shared plumbing for the app-server and MCP transports: client requests
//! with a pending-response map, notifications, and server-initiated
//! requests forwarded to the owning transport.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::debug;

use crate::TransportError;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// A message initiated by the server side of the pipe.
#[derive(Debug, Clone)]
pub(crate) enum ServerMessage {
    /// Needs a response via [`JsonRpcClient::respond`].
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    id: Value,
    result: Value,
}

pub(crate) struct JsonRpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, String>>>>,
    next_request_id: AtomicI64,
    request_timeout_secs: u64,
}

impl JsonRpcClient {
    /// Spawn `bin args...` and start pumping its stdout. Server-initiated
    /// traffic goes to `incoming_tx`.
    pub(crate) fn spawn(
        bin: &Path,
        args: &[&str],
        incoming_tx: mpsc::Sender<ServerMessage>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(bin);
        cmd.args(args)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::CodexNotFound)
            }
            Err(err) => return Err(TransportError::Io(err)),
        };

        let stdin = child.stdin.take().ok_or(TransportError::NotConnected)?;
        let stdout = child.stdout.take().ok_or(TransportError::NotConnected)?;
        let stderr = child.stderr.take();

        let inner = Arc::new(Inner {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicI64::new(1),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        });

        tokio::spawn(run_stdout_loop(Arc::clone(&inner), stdout, incoming_tx));
        if let Some(stderr) = stderr {
            tokio::spawn(run_stderr_loop(stderr));
        }

        Ok(Self { inner })
    }

    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, tx);
        }

        let request = JsonRpcRequest { id, method, params };
        if let Err(err) = self.send_json(&request).await {
            let mut pending = self.inner.pending.lock().await;
            pending.remove(&id);
            return Err(err);
        }

        let res = timeout(
            std::time::Duration::from_secs(self.inner.request_timeout_secs),
            rx,
        )
        .await
        .map_err(|_| TransportError::RequestTimeout {
            method: method.to_string(),
            timeout_secs: self.inner.request_timeout_secs,
        })?
        .map_err(|_| TransportError::ResponseChannelClosed {
            method: method.to_string(),
        })?;

        res.map_err(|message| TransportError::Backend {
            method: method.to_string(),
            message,
        })
    }

    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        self.send_json(&JsonRpcNotification { method, params }).await
    }

    /// Reply to a server-initiated request, echoing its id verbatim.
    pub(crate) async fn respond(&self, id: Value, result: Value) -> Result<(), TransportError> {
        self.send_json(&JsonRpcResponse { id, result }).await
    }

    pub(crate) async fn shutdown(&self) {
        let mut child = self.inner.child.lock().await;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    async fn send_json<T: Serialize>(&self, msg: &T) -> Result<(), TransportError> {
        let line = serde_json::to_string(msg)?;
        let mut stdin = self.inner.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn run_stdout_loop(
    inner: Arc<Inner>,
    stdout: ChildStdout,
    incoming_tx: mpsc::Sender<ServerMessage>,
) {
    let mut reader = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(err) => {
                debug!(component = "rpc", error = %err, "Skipping unparseable line");
                continue;
            }
        };

        // Response to a client request (id + result/error, no method).
        if parsed.get("method").is_none() {
            if let Some(id) = parsed.get("id").and_then(as_i64) {
                let outcome = if let Some(error) = parsed.get("error") {
                    Err(error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string())
                } else {
                    Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
                };
                let tx = {
                    let mut pending = inner.pending.lock().await;
                    pending.remove(&id)
                };
                if let Some(tx) = tx {
                    let _ = tx.send(outcome);
                }
            }
            continue;
        }

        let method = parsed
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = parsed.get("params").cloned().unwrap_or(Value::Null);

        let message = match parsed.get("id") {
            Some(id) => ServerMessage::Request {
                id: id.clone(),
                method,
                params,
            },
            None => ServerMessage::Notification { method, params },
        };
        if incoming_tx.send(message).await.is_err() {
            return;
        }
    }

    // Stdout closed: fail any pending requests.
    let mut pending = inner.pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err("backend closed stdout".to_string()));
    }
}

async fn run_stderr_loop(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            debug!(component = "rpc", stderr = %line, "backend stderr");
        }
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}
