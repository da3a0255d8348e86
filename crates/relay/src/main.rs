use std::path::PathBuf;
use std::sync::Arc;

use codex_relay::hub::{RpcHandlerManager, StdioHub};
use codex_relay::launcher::{ExitReason, RemoteLauncher};
use codex_relay::logging::init_logging;
use codex_relay::mcp_bridge;
use relay_transports::{AppServerTransport, McpTransport, SdkTransport, Transport, TransportKind};
use tokio::sync::mpsc;
use tracing::info;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let logging = init_logging()?;
    let _log_guard = logging.guard;

    let path = std::env::var("CODEX_RELAY_CWD")
        .map(PathBuf::from)
        .or_else(|_| std::env::current_dir())?;

    let kind = TransportKind::from_env();
    info!(
        component = "relay",
        event = "relay.starting",
        run_id = %logging.run_id,
        pid = std::process::id(),
        transport = kind.as_str(),
        path = %path.display(),
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::AppServer => Arc::new(AppServerTransport::new(events_tx)),
        TransportKind::Sdk => Arc::new(SdkTransport::new(events_tx)),
        TransportKind::Mcp => Arc::new(McpTransport::new(events_tx)),
    };

    let rpc = Arc::new(RpcHandlerManager::new());
    let hub = StdioHub::spawn(rpc.clone());
    let bridge = mcp_bridge::start_bundled_mcp();

    let launcher = RemoteLauncher::new(path, transport, events_rx, hub, rpc, bridge);
    let exit = launcher.run().await?;

    info!(
        component = "relay",
        event = "relay.stopped",
        reason = match exit {
            ExitReason::Exit => "exit",
            ExitReason::Switch => "switch",
        },
    );

    // A switch exit asks the surrounding runner to launch the local-mode
    // counterpart; the distinct exit code carries that request.
    if exit == ExitReason::Switch {
        std::process::exit(2);
    }
    Ok(())
}
