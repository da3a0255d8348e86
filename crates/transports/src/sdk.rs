//! SDK transport.
//!
//! Drives one `codex exec --json` invocation per turn, resuming the thread
//! once its id is known. The JSONL stdout stream is the SDK event dialect;
//! every line goes through the SDK mapper. Cancelling the turn kills the
//! worker, which surfaces as `turn_aborted`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use relay_protocol::{ApprovalDecision, CanonicalEvent};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sdk_map::SdkEventMapper;
use crate::{EventSender, SessionConfig, Transport, TransportError, TransportKind};

const DEFAULT_CODEX_BIN: &str = "codex";

pub struct SdkTransport {
    inner: Arc<Inner>,
}

struct Inner {
    codex_bin: PathBuf,
    events_tx: EventSender,
    mapper: Mutex<SdkEventMapper>,
    thread_id: Mutex<Option<String>>,
    config: Mutex<Option<SessionConfig>>,
    turn_cancel: Mutex<Option<CancellationToken>>,
}

impl SdkTransport {
    pub fn new(events_tx: EventSender) -> Self {
        Self::with_binary(PathBuf::from(DEFAULT_CODEX_BIN), events_tx)
    }

    pub fn with_binary(codex_bin: PathBuf, events_tx: EventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                codex_bin,
                events_tx,
                mapper: Mutex::new(SdkEventMapper::new()),
                thread_id: Mutex::new(None),
                config: Mutex::new(None),
                turn_cancel: Mutex::new(None),
            }),
        }
    }

}

#[async_trait]
impl Transport for SdkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sdk
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start_thread(
        &self,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        *self.inner.config.lock().await = Some(config.clone());
        // The thread id arrives on the first worker's `thread.started` event.
        Ok(None)
    }

    async fn resume_thread(
        &self,
        thread_id: &str,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError> {
        *self.inner.config.lock().await = Some(config.clone());
        *self.inner.thread_id.lock().await = Some(thread_id.to_string());
        Ok(Some(thread_id.to_string()))
    }

    async fn start_turn(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let config = self
            .inner
            .config
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NoActiveThread)?;
        let thread_id = self.inner.thread_id.lock().await.clone();

        let turn_cancel = cancel.child_token();
        *self.inner.turn_cancel.lock().await = Some(turn_cancel.clone());

        let mut cmd = tokio::process::Command::new(&self.inner.codex_bin);
        cmd.arg("exec");
        if let Some(thread_id) = &thread_id {
            cmd.arg("resume").arg(thread_id);
        }
        cmd.arg("--json")
            .arg("--skip-git-repo-check")
            .arg("-C")
            .arg(&config.cwd)
            .arg("--sandbox")
            .arg(&config.sandbox_mode);
        if let Some(model) = &config.model {
            cmd.arg("-m").arg(model);
        }
        if let Some(effort) = &config.reasoning_effort {
            cmd.arg("-c")
                .arg(format!("model_reasoning_effort={}", effort));
        }
        cmd.arg(input)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(&config.cwd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::CodexNotFound)
            }
            Err(err) => return Err(TransportError::Io(err)),
        };
        let stdout = child.stdout.take().ok_or(TransportError::NotConnected)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_worker(inner, child, stdout, turn_cancel).await;
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
        _decision: &ApprovalDecision,
    ) -> Result<(), TransportError> {
        // The SDK dialect has no approval-callback bridge; approvals are
        // avoided by running with an on-failure policy.
        debug!(component = "sdk", approval_id = %id, "Ignoring approval decision");
        Ok(())
    }

    async fn reset_stream_state(&self) {
        self.inner.mapper.lock().await.reset();
    }

    async fn clear_thread(&self) {
        *self.inner.thread_id.lock().await = None;
        self.reset_stream_state().await;
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(cancel) = self.inner.turn_cancel.lock().await.take() {
            cancel.cancel();
        }
        Ok(())
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stdout).lines();
    let mut saw_terminal = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                let turn_id = {
                    let mut mapper = inner.mapper.lock().await;
                    let id = mapper.current_turn_id().map(str::to_string);
                    mapper.reset();
                    id
                };
                let _ = inner
                    .events_tx
                    .send(CanonicalEvent::TurnAborted { turn_id })
                    .await;
                return;
            }
            line = reader.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(component = "sdk", error = %err, "Worker stdout read failed");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                    debug!(component = "sdk", "Skipping non-JSON worker line");
                    continue;
                };
                let events = inner.mapper.lock().await.map(&value);
                for event in events {
                    if let CanonicalEvent::ThreadStarted { thread_id } = &event {
                        *inner.thread_id.lock().await = Some(thread_id.clone());
                    }
                    saw_terminal |= event.is_terminal();
                    if inner.events_tx.send(event).await.is_err() {
                        let _ = child.start_kill();
                        return;
                    }
                }
            }
        }
    }

    let status = child.wait().await;
    if !saw_terminal {
        // The worker died without a terminal event; close the turn so the
        // orchestrator does not hang.
        let turn_id = {
            let mut mapper = inner.mapper.lock().await;
            let id = mapper.current_turn_id().map(str::to_string);
            mapper.reset();
            id
        };
        let error = match status {
            Ok(status) => format!("codex exec exited with {}", status),
            Err(err) => format!("codex exec wait failed: {}", err),
        };
        let _ = inner
            .events_tx
            .send(CanonicalEvent::TaskFailed {
                turn_id,
                error: Some(error),
            })
            .await;
    }
}
