//! Remote launcher.
//!
//! Drives the single hub-visible session through arbitrarily many turns:
//! queue → transport call → event demux → hub emit → ready. Owns the turn
//! lifecycle, the progress watchdog, abort handling, mode-change restarts,
//! and session-invalidation recovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_protocol::{
    AgentStateUpdate, ApprovalDecision, ApprovalInput, ApprovalRequest, CanonicalEvent, EnhancedMode,
    HubRecord, MessageKind, SessionEvent, ToolCallStatus,
};
use relay_transports::{Transport, TransportError, TransportKind};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::{HubClient, RpcHandlerManager};
use crate::mcp_bridge::McpBridgeHandle;
use crate::message_buffer::MessageBuffer;
use crate::permissions::PermissionHandler;
use crate::processors::{preview, DiffProcessor, ReasoningProcessor};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::session::Session;

const WATCHDOG_TICK: Duration = Duration::from_secs(5);
const STALL_THRESHOLD: Duration = Duration::from_secs(90);
const STALL_MESSAGE: &str =
    "Codex has made no progress for 90 seconds and might be stuck; you can abort the turn or keep waiting.";

const SESSION_INVALIDATION_PATTERNS: [&str; 6] = [
    "no active session",
    "session not found",
    "conversation not found",
    "invalid session",
    "invalid conversation",
    "thread not found",
];

/// Whether a backend error means the thread/session is gone and the next
/// message must recreate it.
pub fn is_session_invalidation(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    SESSION_INVALIDATION_PATTERNS
        .iter()
        .any(|p| lower.contains(p))
}

/// Control signals from hub RPC handlers and the TUI.
#[derive(Debug)]
pub enum LauncherSignal {
    Abort,
    Exit,
    Switch,
    Approval {
        id: String,
        decision: ApprovalDecision,
    },
}

/// Why the launcher stopped. `Switch` tells the surrounding runner to
/// launch the local-mode counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Exit,
    Switch,
}

enum TurnOutcome {
    Finished,
    Exit(ExitReason),
}

pub struct RemoteLauncher {
    session: Session,
    queue: Arc<MessageQueue>,
    buffer: Arc<MessageBuffer>,
    hub: Arc<dyn HubClient>,
    rpc: Arc<RpcHandlerManager>,
    transport: Arc<dyn Transport>,
    permissions: Arc<PermissionHandler>,
    events_rx: mpsc::Receiver<CanonicalEvent>,
    signals_tx: mpsc::UnboundedSender<LauncherSignal>,
    signals_rx: mpsc::UnboundedReceiver<LauncherSignal>,
    mcp_bridge: McpBridgeHandle,
    reasoning: ReasoningProcessor,
    diff: DiffProcessor,
    abort_token: CancellationToken,

    was_created: bool,
    current_mode_hash: Option<String>,
    current_thread_id: Option<String>,
    current_turn_id: Option<String>,
    turn_in_flight: bool,
    pending: Option<QueuedMessage>,
    first: bool,
}

impl RemoteLauncher {
    pub fn new(
        path: PathBuf,
        transport: Arc<dyn Transport>,
        events_rx: mpsc::Receiver<CanonicalEvent>,
        hub: Arc<dyn HubClient>,
        rpc: Arc<RpcHandlerManager>,
        mcp_bridge: McpBridgeHandle,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(path),
            queue: Arc::new(MessageQueue::new()),
            buffer: Arc::new(MessageBuffer::new()),
            permissions: Arc::new(PermissionHandler::new(hub.clone())),
            hub,
            rpc,
            transport,
            events_rx,
            signals_tx,
            signals_rx,
            mcp_bridge,
            reasoning: ReasoningProcessor::new(),
            diff: DiffProcessor::new(),
            abort_token: CancellationToken::new(),
            was_created: false,
            current_mode_hash: None,
            current_thread_id: None,
            current_turn_id: None,
            turn_in_flight: false,
            pending: None,
            first: true,
        }
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    pub fn buffer(&self) -> Arc<MessageBuffer> {
        self.buffer.clone()
    }

    /// Sender for TUI-originated abort/exit/switch signals.
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<LauncherSignal> {
        self.signals_tx.clone()
    }

    /// Run the session to completion.
    pub async fn run(mut self) -> Result<ExitReason, TransportError> {
        self.install_rpc_handlers();

        // A connection failure is the one error that exits the session.
        self.transport.connect().await?;
        info!(
            component = "launcher",
            event = "session.started",
            transport = self.transport.kind().as_str(),
            path = %self.session.path.display(),
        );
        self.hub.send_session_event(SessionEvent::Ready).await;

        let exit = loop {
            match self.next_message().await {
                NextMessage::Exit(reason) => break reason,
                NextMessage::Message(message) => {
                    if self.needs_mode_restart(&message) {
                        self.restart_for_mode_change(message).await;
                        continue;
                    }
                    match self.run_message(message).await {
                        Ok(TurnOutcome::Finished) => {}
                        Ok(TurnOutcome::Exit(reason)) => break reason,
                        Err(err) => {
                            warn!(component = "launcher", error = %err, "Session cannot continue");
                            break ExitReason::Exit;
                        }
                    }
                }
            }
        };

        self.shutdown().await;
        Ok(exit)
    }

    // ---- idle phase ----

    async fn next_message(&mut self) -> NextMessage {
        if let Some(pending) = self.pending.take() {
            return NextMessage::Message(pending);
        }
        loop {
            let queue = self.queue.clone();
            let cancel = self.abort_token.clone();
            let step = tokio::select! {
                msg = queue.wait_for_message(&cancel) => IdleStep::Dequeued(msg),
                sig = self.signals_rx.recv() => IdleStep::Signal(sig),
                ev = self.events_rx.recv() => IdleStep::Event(ev),
            };
            match step {
                IdleStep::Dequeued(Some(msg)) => return NextMessage::Message(msg),
                // A cancelled idle wait does not terminate the loop.
                IdleStep::Dequeued(None) => {
                    self.abort_token = CancellationToken::new();
                }
                // Aborting an idle session is a no-op.
                IdleStep::Signal(Some(LauncherSignal::Abort)) => {}
                IdleStep::Signal(Some(LauncherSignal::Exit)) => {
                    return NextMessage::Exit(ExitReason::Exit)
                }
                IdleStep::Signal(Some(LauncherSignal::Switch)) => {
                    return NextMessage::Exit(ExitReason::Switch)
                }
                IdleStep::Signal(Some(LauncherSignal::Approval { id, decision })) => {
                    self.handle_approval(&id, decision).await;
                }
                IdleStep::Signal(None) => return NextMessage::Exit(ExitReason::Exit),
                IdleStep::Event(Some(ev)) => debug!(
                    component = "launcher",
                    event = ev.kind(),
                    "Dropping stray event while idle"
                ),
                IdleStep::Event(None) => return NextMessage::Exit(ExitReason::Exit),
            }
        }
    }

    // ---- mode-change restart ----

    fn needs_mode_restart(&self, message: &QueuedMessage) -> bool {
        self.was_created
            && self.transport.kind() != TransportKind::AppServer
            && self
                .current_mode_hash
                .as_deref()
                .map(|hash| hash != message.hash)
                .unwrap_or(false)
    }

    async fn restart_for_mode_change(&mut self, message: QueuedMessage) {
        info!(
            component = "launcher",
            event = "session.mode_restart",
            "Mode changed, restarting backend session"
        );
        self.reset_processors().await;
        self.transport.clear_thread().await;
        self.was_created = false;
        self.current_mode_hash = None;
        self.current_thread_id = None;
        self.set_thinking(false).await;
        self.pending = Some(message);
    }

    // ---- turn phase ----

    async fn run_message(&mut self, message: QueuedMessage) -> Result<TurnOutcome, TransportError> {
        self.buffer.push(MessageKind::User, &message.message);
        self.current_mode_hash = Some(message.hash.clone());
        self.session.apply_mode(&message.mode);

        if !self.was_created {
            self.ensure_thread().await?;
            self.was_created = true;
        }
        if self.first {
            self.first = false;
            info!(component = "launcher", event = "session.first_turn");
        }

        Ok(self.run_turn(&message).await)
    }

    async fn ensure_thread(&mut self) -> Result<(), TransportError> {
        let config = self.session.transport_config(
            self.transport.kind() == TransportKind::AppServer,
            self.mcp_bridge.mcp_servers.clone(),
        );

        let bound = if self.transport.supports_resume() && self.session.session_id.is_some() {
            let session_id = self.session.session_id.clone().unwrap_or_default();
            match self.transport.resume_thread(&session_id, &config).await {
                Ok(bound) => bound,
                Err(err) => {
                    warn!(
                        component = "launcher",
                        error = %err,
                        "Resume failed, starting a fresh thread"
                    );
                    self.transport.start_thread(&config).await?
                }
            }
        } else {
            self.transport.start_thread(&config).await?
        };

        if let Some(thread_id) = bound {
            self.bind_thread(thread_id);
        }
        Ok(())
    }

    fn bind_thread(&mut self, thread_id: String) {
        self.session.session_id = Some(thread_id.clone());
        self.current_thread_id = Some(thread_id);
    }

    async fn run_turn(&mut self, message: &QueuedMessage) -> TurnOutcome {
        self.turn_in_flight = true;
        self.current_turn_id = None;
        self.set_thinking(true).await;

        let cancel = self.abort_token.child_token();
        if let Err(err) = self.transport.start_turn(&message.message, cancel).await {
            let invalidation = self.finish_failed_start(err).await;
            self.finish_turn(invalidation).await;
            return TurnOutcome::Finished;
        }

        let mut last_progress = Instant::now();
        let mut watchdog_notified = false;
        let mut watchdog = tokio::time::interval(WATCHDOG_TICK);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut invalidation: Option<String> = None;
        let mut exit: Option<ExitReason> = None;

        loop {
            let step = tokio::select! {
                ev = self.events_rx.recv() => TurnStep::Event(ev),
                _ = watchdog.tick() => TurnStep::Tick,
                sig = self.signals_rx.recv() => TurnStep::Signal(sig),
            };
            match step {
                TurnStep::Event(Some(ev)) => {
                    last_progress = Instant::now();
                    if self.handle_turn_event(ev, &mut invalidation).await {
                        break;
                    }
                }
                TurnStep::Event(None) => {
                    // Event channel gone: the transport died mid-turn.
                    let failed = CanonicalEvent::TaskFailed {
                        turn_id: self.current_turn_id.clone(),
                        error: Some("transport event stream closed".to_string()),
                    };
                    self.emit_event(failed).await;
                    break;
                }
                TurnStep::Tick => {
                    if self.turn_in_flight
                        && !watchdog_notified
                        && last_progress.elapsed() >= STALL_THRESHOLD
                    {
                        watchdog_notified = true;
                        self.hub
                            .send_session_event(SessionEvent::Message {
                                message: STALL_MESSAGE.to_string(),
                            })
                            .await;
                        self.buffer.push(MessageKind::Status, STALL_MESSAGE);
                    }
                }
                TurnStep::Signal(Some(LauncherSignal::Abort)) => {
                    self.do_abort().await;
                    // The transport delivers the matching turn_aborted.
                }
                TurnStep::Signal(Some(LauncherSignal::Exit)) => {
                    self.do_abort().await;
                    self.emit_event(CanonicalEvent::TurnAborted {
                        turn_id: self.current_turn_id.clone(),
                    })
                    .await;
                    exit = Some(ExitReason::Exit);
                    break;
                }
                TurnStep::Signal(Some(LauncherSignal::Switch)) => {
                    self.do_abort().await;
                    self.emit_event(CanonicalEvent::TurnAborted {
                        turn_id: self.current_turn_id.clone(),
                    })
                    .await;
                    exit = Some(ExitReason::Switch);
                    break;
                }
                TurnStep::Signal(Some(LauncherSignal::Approval { id, decision })) => {
                    self.handle_approval(&id, decision).await;
                }
                TurnStep::Signal(None) => {
                    exit = Some(ExitReason::Exit);
                    break;
                }
            }
        }

        self.finish_turn(invalidation).await;
        match exit {
            Some(reason) => TurnOutcome::Exit(reason),
            None => TurnOutcome::Finished,
        }
    }

    /// Route one canonical event. Returns true when the turn is over.
    async fn handle_turn_event(
        &mut self,
        ev: CanonicalEvent,
        invalidation: &mut Option<String>,
    ) -> bool {
        match &ev {
            CanonicalEvent::ThreadStarted { thread_id } => {
                self.bind_thread(thread_id.clone());
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::TaskStarted { turn_id } => {
                self.current_turn_id = turn_id.clone();
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::AgentReasoningDelta { delta } => {
                let records = self.reasoning.process_delta(delta);
                self.send_records(records).await;
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::AgentReasoningSectionBreak => {
                let records = self.reasoning.handle_section_break();
                self.send_records(records).await;
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::AgentReasoning { text } => {
                let records = self.reasoning.complete(Some(text));
                self.send_records(records).await;
                self.buffer.push(MessageKind::System, preview(text));
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::AgentMessage { message } => {
                self.buffer.push(MessageKind::Assistant, message.clone());
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::ExecCommandBegin {
                command,
                command_label,
                ..
            } => {
                let line = command_label
                    .clone()
                    .or_else(|| command.clone())
                    .unwrap_or_else(|| "command".to_string());
                self.buffer.push(MessageKind::Tool, line);
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::ExecCommandEnd { output, .. } => {
                if let Some(output) = output {
                    self.buffer.push(MessageKind::Result, preview(output));
                }
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::ExecApprovalRequest {
                call_id,
                command,
                cwd,
                message,
                tool,
            } => {
                let request = ApprovalRequest {
                    id: call_id.clone(),
                    tool_name: tool.clone().unwrap_or_else(|| "Bash".to_string()),
                    input: ApprovalInput {
                        command: command.clone(),
                        cwd: cwd.clone(),
                        message: message.clone(),
                        tool: tool.clone(),
                    },
                };
                self.permissions.on_request(request).await;
                self.buffer.push(
                    MessageKind::Status,
                    format!(
                        "approval requested: {}",
                        command.clone().or_else(|| message.clone()).unwrap_or_default()
                    ),
                );
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::PatchApplyBegin { changes, .. } => {
                let files: Vec<&str> = changes.keys().map(String::as_str).collect();
                self.buffer
                    .push(MessageKind::Tool, format!("edit: {}", files.join(", ")));
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::PatchApplyEnd { success, .. } => {
                let line = if *success { "patch applied" } else { "patch failed" };
                self.buffer.push(MessageKind::Result, line);
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::TodoList { items } => {
                let call_id = relay_protocol::new_id();
                let entries: Vec<Value> = items
                    .iter()
                    .map(|item| {
                        json!({
                            "content": item.content,
                            "status": item.status,
                            "priority": item.priority,
                        })
                    })
                    .collect();
                self.send_records(vec![
                    HubRecord::tool_call(call_id.clone(), "plan", json!({"entries": entries})),
                    HubRecord::tool_call_result(
                        call_id,
                        ToolCallStatus::Completed,
                        json!({"entries": entries}),
                    ),
                ])
                .await;
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::TurnDiff { unified_diff } => {
                self.diff.handle_turn_diff(unified_diff);
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::TokenCount { .. } => {
                self.emit_event(ev).await;
                false
            }

            CanonicalEvent::StreamError { message, .. } => {
                // Retryable errors never reach this stream, so anything here
                // ends the turn.
                if is_session_invalidation(message) {
                    *invalidation = Some(message.clone());
                }
                self.buffer.push(MessageKind::Status, message.clone());
                self.emit_event(ev).await;
                true
            }

            CanonicalEvent::Error { message, .. } => {
                if is_session_invalidation(message) {
                    *invalidation = Some(message.clone());
                }
                self.buffer.push(MessageKind::Status, message.clone());
                self.emit_event(ev).await;
                true
            }

            CanonicalEvent::TaskComplete { .. } => {
                let records = self.reasoning.complete(None);
                self.send_records(records).await;
                self.emit_event(ev).await;
                true
            }

            CanonicalEvent::TaskFailed { error, .. } => {
                if let Some(error) = error {
                    if is_session_invalidation(error) {
                        *invalidation = Some(error.clone());
                    }
                    self.buffer.push(MessageKind::Status, error.clone());
                }
                let records = self.reasoning.complete(None);
                self.send_records(records).await;
                // A fatal MCP turn error forces a session restart, since the
                // backend session cannot continue a failed turn.
                if self.transport.kind() == TransportKind::Mcp {
                    self.was_created = false;
                    self.transport.clear_thread().await;
                }
                self.emit_event(ev).await;
                true
            }

            CanonicalEvent::TurnAborted { .. } => {
                let records = self.reasoning.abort();
                self.send_records(records).await;
                self.emit_event(ev).await;
                true
            }
        }
    }

    /// The turn/start call itself failed; synthesize the terminal event.
    async fn finish_failed_start(&mut self, err: TransportError) -> Option<String> {
        match err {
            TransportError::Interrupted => {
                self.emit_event(CanonicalEvent::TurnAborted {
                    turn_id: self.current_turn_id.clone(),
                })
                .await;
                None
            }
            err => {
                let message = err.to_string();
                let invalidation = is_session_invalidation(&message).then(|| message.clone());
                self.buffer.push(MessageKind::Status, message.clone());
                self.emit_event(CanonicalEvent::TaskFailed {
                    turn_id: self.current_turn_id.clone(),
                    error: Some(message),
                })
                .await;
                invalidation
            }
        }
    }

    async fn finish_turn(&mut self, invalidation: Option<String>) {
        self.turn_in_flight = false;
        self.current_turn_id = None;

        if let Some(diff) = self.diff.flush() {
            self.buffer.push(MessageKind::Result, preview(&diff));
        }

        if let Some(message) = invalidation {
            info!(
                component = "launcher",
                event = "session.invalidated",
                error = %message,
            );
            self.was_created = false;
            self.current_mode_hash = None;
            self.current_thread_id = None;
            self.transport.clear_thread().await;
            self.hub
                .send_session_event(SessionEvent::Message { message })
                .await;
        }

        self.set_thinking(false).await;
        self.hub.send_session_event(SessionEvent::Ready).await;
    }

    // ---- abort ----

    async fn do_abort(&mut self) {
        self.abort_token.cancel();
        if let Err(err) = self
            .transport
            .interrupt_turn(
                self.current_thread_id.as_deref(),
                self.current_turn_id.as_deref(),
            )
            .await
        {
            warn!(component = "launcher", error = %err, "Interrupt failed");
        }
        self.queue.reset();
        self.reset_processors().await;
        // Fresh token so the next turn starts clean.
        self.abort_token = CancellationToken::new();
    }

    async fn reset_processors(&mut self) {
        let records = self.reasoning.abort();
        self.send_records(records).await;
        self.diff.reset();
        self.permissions.reset();
        self.transport.reset_stream_state().await;
    }

    // ---- plumbing ----

    async fn handle_approval(&mut self, id: &str, decision: ApprovalDecision) {
        if self.permissions.on_complete(id, &decision).await.is_some() {
            if let Err(err) = self.transport.resolve_approval(id, &decision).await {
                warn!(component = "launcher", error = %err, "Failed to deliver approval decision");
            }
        }
    }

    async fn emit_event(&self, event: CanonicalEvent) {
        self.hub.send_codex_message(HubRecord::event(event)).await;
    }

    async fn send_records(&self, records: Vec<HubRecord>) {
        for record in records {
            self.hub.send_codex_message(record).await;
        }
    }

    async fn set_thinking(&mut self, thinking: bool) {
        if self.session.thinking != thinking {
            self.session.thinking = thinking;
            self.hub
                .update_agent_state(AgentStateUpdate::thinking(thinking))
                .await;
        }
    }

    fn install_rpc_handlers(&self) {
        use relay_protocol::hub::rpc;

        let signals = self.signals_tx.clone();
        self.rpc.register_handler(
            rpc::ABORT,
            Arc::new(move |_params| {
                let _ = signals.send(LauncherSignal::Abort);
                json!({"ok": true})
            }),
        );

        let signals = self.signals_tx.clone();
        self.rpc.register_handler(
            rpc::SWITCH_TO_LOCAL,
            Arc::new(move |_params| {
                let _ = signals.send(LauncherSignal::Switch);
                json!({"ok": true})
            }),
        );

        let queue = self.queue.clone();
        self.rpc.register_handler(
            rpc::USER_MESSAGE,
            Arc::new(move |params| {
                let Some(message) = params.get("message").and_then(Value::as_str) else {
                    return json!({"ok": false, "error": "missing message"});
                };
                let mode: EnhancedMode = params
                    .get("mode")
                    .cloned()
                    .and_then(|m| serde_json::from_value(m).ok())
                    .unwrap_or_default();
                queue.push(message, mode);
                json!({"ok": true})
            }),
        );

        for method in [
            rpc::APPROVE_COMMAND,
            rpc::APPROVE_FILE_CHANGE,
            rpc::APPROVE_TOOL_INPUT,
        ] {
            let signals = self.signals_tx.clone();
            self.rpc.register_handler(
                method,
                Arc::new(move |params| {
                    let Some(id) = params.get("id").and_then(Value::as_str) else {
                        return json!({"ok": false, "error": "missing id"});
                    };
                    let decision = params
                        .get("decision")
                        .and_then(Value::as_str)
                        .unwrap_or("denied");
                    let reason = params
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let _ = signals.send(LauncherSignal::Approval {
                        id: id.to_string(),
                        decision: ApprovalDecision::from_decision(decision, reason),
                    });
                    json!({"ok": true})
                }),
            );
        }
    }

    async fn shutdown(&mut self) {
        info!(component = "launcher", event = "session.stopping");
        let _ = self.transport.disconnect().await;
        self.mcp_bridge.stop().await;
        self.diff.reset();
        self.reasoning.reset();
        self.permissions.reset();
        self.queue.close();
        self.rpc.deregister_all();
    }
}

enum NextMessage {
    Message(QueuedMessage),
    Exit(ExitReason),
}

enum IdleStep {
    Dequeued(Option<QueuedMessage>),
    Signal(Option<LauncherSignal>),
    Event(Option<CanonicalEvent>),
}

enum TurnStep {
    Event(Option<CanonicalEvent>),
    Tick,
    Signal(Option<LauncherSignal>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_pattern_matching() {
        assert!(is_session_invalidation("conversation not found"));
        assert!(is_session_invalidation("Thread Not Found: thr_1"));
        assert!(is_session_invalidation("backend says: no active session"));
        assert!(is_session_invalidation("Invalid session id"));
        assert!(!is_session_invalidation("rate limit exceeded"));
        assert!(!is_session_invalidation(""));
    }
}
