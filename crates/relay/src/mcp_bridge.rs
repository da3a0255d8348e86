//! Bundled MCP bridge handle.
//!
//! The bridge itself is built elsewhere; we consume a handle carrying the
//! hub-provided MCP server specs (forwarded into transport configuration)
//! and a stop hook for shutdown.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

const MCP_SERVERS_ENV: &str = "CODEX_RELAY_MCP_SERVERS";

pub struct McpBridgeHandle {
    pub mcp_servers: BTreeMap<String, Value>,
}

impl McpBridgeHandle {
    pub async fn stop(&self) {
        debug!(component = "mcp_bridge", "Stopped bundled MCP server");
    }
}

/// Construct the bundled MCP bridge. Server specs come from the
/// environment; an empty map just means the backend gets no extra tools.
pub fn start_bundled_mcp() -> McpBridgeHandle {
    let mcp_servers = match std::env::var(MCP_SERVERS_ENV) {
        Ok(raw) => match serde_json::from_str::<BTreeMap<String, Value>>(&raw) {
            Ok(map) => map,
            Err(err) => {
                warn!(
                    component = "mcp_bridge",
                    error = %err,
                    "Ignoring malformed {}", MCP_SERVERS_ENV
                );
                BTreeMap::new()
            }
        },
        Err(_) => BTreeMap::new(),
    };
    McpBridgeHandle { mcp_servers }
}
