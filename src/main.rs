//! # Telemetry Archiver
//!
//! Records sensor telemetry in fixed windows and ships sealed records to an
//! archive host.
//!
//! # Usage
//!
//! ```text
//! telemetry-archiver [run] [--config PATH]
//! telemetry-archiver query START END [--config PATH]
//! ```
//!
//! `run` reads newline-delimited ingestion messages on stdin (the peer adapter
//! pipes them in), prints the latest frame after each one, and seals a record
//! every `record.lifespan_s` seconds. End of input counts as a peer disconnect.
//!
//! `query` fetches every archived record with a stamp in `[START, END]`
//! (`YYYYMMDDHHMMSS`) and prints the assembled dataset as JSON.
//!
//! # Examples
//!
//! ```bash
//! sensor-bridge | telemetry-archiver --config config/default.toml
//! telemetry-archiver query 20240101000000 20240102000000
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use telemetry_archiver::archive::{ArchiveAssembler, RemoteArchiveClient};
use telemetry_archiver::config::{Config, LoggingConfig};
use telemetry_archiver::display::StdoutDisplay;
use telemetry_archiver::driver::{forward_json_lines, IngestDriver};
use telemetry_archiver::record::SealContext;
use telemetry_archiver::store::LocalStore;

/// Config file picked up when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Buffered peer events between the stdin adapter and the driver
const PEER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Query { start: String, end: String },
}

#[derive(Debug, PartialEq)]
struct Invocation {
    command: Command,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut config = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        [] | ["run"] => Command::Run,
        ["query", start, end] => Command::Query {
            start: start.to_string(),
            end: end.to_string(),
        },
        ["query", ..] => bail!("usage: telemetry-archiver query START END [--config PATH]"),
        [other, ..] => bail!("unknown command '{}'", other),
    };

    Ok(Invocation { command, config })
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Stdout logging, plus a daily rolling file when `log_dir` is set
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = config
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.level))?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if config.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, "telemetry-archiver.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(Some(guard))
}

/// Main entry point
///
/// Loads configuration, initializes logging and dispatches the subcommand.
/// Ctrl+C during `run` seals the current record and waits for the flush.
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = parse_args(&args)?;
    let config = load_config(invocation.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Telemetry Archiver v{} starting...", env!("CARGO_PKG_VERSION"));

    match invocation.command {
        Command::Run => run(config).await,
        Command::Query { start, end } => query(config, &start, &end).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let ctx = Arc::new(SealContext::from_config(&config)?);
    info!(
        "Records last {:?}, pending files in {}",
        ctx.lifespan(),
        ctx.store().pending_dir().display()
    );

    // Files left behind by an earlier run go out as soon as the host answers
    let startup_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        match startup_ctx.ship_pending().await {
            Ok(0) => {}
            Ok(n) => info!("Shipped {} records left from a previous run", n),
            Err(e) => warn!("Leftover records stay local: {}", e),
        }
    });

    let (tx, mut rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
    tokio::spawn(forward_json_lines(BufReader::new(tokio::io::stdin()), tx));

    let mut driver = IngestDriver::new(ctx, config.receive_timeout(), StdoutDisplay);

    tokio::select! {
        _ = driver.run(&mut rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    let reports = driver.shutdown().await;
    let failed = reports.iter().filter(|report| report.flush_failed()).count();
    if failed > 0 {
        warn!("{} records could not be written", failed);
    }

    let stats = driver.stats();
    info!("Total samples ingested: {} across {} records", stats.samples, stats.records);
    Ok(())
}

async fn query(config: Config, start: &str, end: &str) -> Result<()> {
    if !config.archive.enabled {
        bail!("archive is disabled in configuration; nothing to query");
    }

    let assembler = ArchiveAssembler::new(
        RemoteArchiveClient::from_config(&config.archive),
        LocalStore::from_config(&config.store),
        config.display_settings()?,
    );

    let dataset = assembler.query(start, end).await?;
    info!("Assembled {} frames from {} files", dataset.len(), dataset.files.len());

    println!("{}", serde_json::to_string_pretty(&dataset)?);
    Ok(())
}
