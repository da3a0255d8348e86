//! Codex Relay Transports
//!
//! The three interchangeable backends that execute a model turn, each
//! adapted behind a converter that translates its event dialect into the
//! canonical stream. The orchestrator only ever sees [`CanonicalEvent`]s
//! and the [`Transport`] trait.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use relay_protocol::{ApprovalDecision, CanonicalEvent};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod app_server;
pub mod convert;
pub mod envelope;
pub mod mcp;
mod rpc;
pub mod sdk;
pub mod sdk_map;
pub mod throttle;

pub use app_server::AppServerTransport;
pub use convert::AppServerConverter;
pub use mcp::McpTransport;
pub use sdk::SdkTransport;
pub use sdk_map::SdkEventMapper;
pub use throttle::DebugThrottle;

/// Errors that can occur in transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("codex binary not found on PATH")]
    CodexNotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport is not connected")]
    NotConnected,

    #[error("no active thread")]
    NoActiveThread,

    #[error("request timed out after {timeout_secs}s: {method}")]
    RequestTimeout { method: String, timeout_secs: u64 },

    #[error("response channel closed: {method}")]
    ResponseChannelClosed { method: String },

    #[error("backend error for {method}: {message}")]
    Backend { method: String, message: String },

    #[error("thread id missing from {method} response")]
    MissingThreadId { method: String },

    #[error("turn interrupted")]
    Interrupted,
}

/// Which backend drives the session. Selected once at startup, immutable
/// for the lifetime of the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    AppServer,
    Sdk,
    Mcp,
}

impl TransportKind {
    /// Resolve the transport from the environment. `CODEX_USE_SDK=1` wins
    /// over `CODEX_USE_MCP_SERVER=1`; the app-server is the default.
    pub fn from_env() -> Self {
        if env_flag("CODEX_USE_SDK") {
            TransportKind::Sdk
        } else if env_flag("CODEX_USE_MCP_SERVER") {
            TransportKind::Mcp
        } else {
            TransportKind::AppServer
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::AppServer => "app-server",
            TransportKind::Sdk => "sdk",
            TransportKind::Mcp => "mcp",
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true")
    )
}

/// Backend configuration derived from the session's current mode.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub approval_policy: String,
    pub sandbox_mode: String,
    /// Hub-provided MCP servers forwarded into the backend configuration.
    pub mcp_servers: BTreeMap<String, Value>,
}

/// A backend capable of running turns for one thread at a time.
///
/// Implementations push canonical events into the channel handed to them at
/// construction; they never emit anything outside [`CanonicalEvent`].
/// Adapters do not throw into the orchestrator either: turn-level failures
/// become `task_failed`/`error` events, and only connection-level failures
/// surface as `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the backend connection (spawn the subprocess, handshake).
    async fn connect(&self) -> Result<(), TransportError>;

    /// Start a fresh thread. Returns the thread id when the backend reports
    /// one synchronously; otherwise the id arrives as a `thread_started`
    /// canonical event.
    async fn start_thread(&self, config: &SessionConfig)
        -> Result<Option<String>, TransportError>;

    /// Resume an existing thread by id.
    async fn resume_thread(
        &self,
        thread_id: &str,
        config: &SessionConfig,
    ) -> Result<Option<String>, TransportError>;

    /// Whether `resume_thread` can work at all on this transport.
    fn supports_resume(&self) -> bool {
        true
    }

    /// Submit a turn. Returns once the turn has been handed to the backend;
    /// events (including the terminal one) flow through the event channel.
    async fn start_turn(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Interrupt the in-flight turn. The app-server needs both ids; the
    /// SDK kills its worker; MCP has no interrupt and only cancels the
    /// local wait.
    async fn interrupt_turn(
        &self,
        thread_id: Option<&str>,
        turn_id: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Answer an outstanding approval request on the wire.
    async fn resolve_approval(
        &self,
        id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), TransportError>;

    /// Drop per-turn converter/accumulator state (turn abort).
    async fn reset_stream_state(&self);

    /// Forget the current thread so the next message starts fresh.
    async fn clear_thread(&self);

    /// Tear the backend down.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Channel type the orchestrator hands to a transport at construction.
pub type EventSender = tokio::sync::mpsc::Sender<CanonicalEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(TransportKind::AppServer.as_str(), "app-server");
        assert_eq!(TransportKind::Sdk.as_str(), "sdk");
        assert_eq!(TransportKind::Mcp.as_str(), "mcp");
    }
}
