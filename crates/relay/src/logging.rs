//! Log bootstrap.
//!
//! Stdout belongs to the hub link, so diagnostics go to a file under the
//! relay's home directory. Filter and output format are tunable through
//! the environment.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "relay.log";
const FILTER_SOURCES: [&str; 2] = ["CODEX_RELAY_LOG_FILTER", "RUST_LOG"];

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("CODEX_RELAY_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

fn relay_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".codex-relay")
}

fn log_filter() -> EnvFilter {
    FILTER_SOURCES
        .iter()
        .find_map(|source| {
            let value = std::env::var(source).ok()?;
            EnvFilter::try_new(value).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("info"))
}

pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    let dir = relay_home().join("logs");
    std::fs::create_dir_all(&dir)?;

    let (sink, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, LOG_FILE));

    let format = LogFormat::from_env();
    let base = tracing_subscriber::registry().with(log_filter());
    match format {
        LogFormat::Pretty => base
            .with(fmt::layer().with_writer(sink).with_ansi(false).pretty())
            .init(),
        LogFormat::Json => base
            .with(
                fmt::layer()
                    .with_writer(sink)
                    .json()
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init(),
    }

    // Each process gets a fresh run id so interleaved log files from
    // restarted sessions stay distinguishable.
    let run_id = relay_protocol::new_id();
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        dir = %dir.display(),
        file = LOG_FILE,
        format = format.name(),
        run_id = %run_id,
    );

    Ok(LoggingHandle { run_id, guard })
}
