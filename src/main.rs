//! # Balloon Telemetry
//!
//! Ground-station receiver for a high-altitude balloon payload.
//!
//! Reads telemetry frames from the serial receiver, keeps the latest state in
//! memory for live observers, and logs every record to rotating JSONL files.
//! The `export` subcommand turns that log into a CSV file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use balloon_telemetry::config::{Config, LoggingConfig};
use balloon_telemetry::protocol::types::TelemetryRecord;
use balloon_telemetry::serial::SerialOpener;
use balloon_telemetry::shutdown::Shutdown;
use balloon_telemetry::telemetry::{
    export_csv_file, Ingestor, JsonlSink, SinkHandle, TelemetryEvent, TelemetryStore,
};

/// Log file name prefix used by the daily rolling appender
const LOG_FILE_NAME: &str = "balloon-telemetry.log";

#[derive(Parser, Debug)]
#[command(name = "balloon-telemetry", version)]
#[command(about = "High-altitude balloon telemetry ground station", long_about = None)]
struct Cli {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest telemetry from the serial receiver (default)
    Run,
    /// Convert the JSONL record log into a CSV file
    Export {
        /// Destination CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Record log directory; defaults to persistence.log_dir
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

/// Main entry point
///
/// # Control Flow
///
/// 1. Parse the command line and load the configuration
/// 2. Set up logging (console, plus a daily file when configured)
/// 3. Either export the record log, or run the ingestion pipeline until
///    Ctrl+C, then stop the producer and wait for the log to drain
///
/// # Examples
///
/// ```bash
/// balloon-telemetry --config config/default.toml
/// balloon-telemetry export --output flight.csv
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Export { output, log_dir } => {
            let log_dir = log_dir.unwrap_or_else(|| PathBuf::from(&config.persistence.log_dir));
            let rows = export_csv_file(&log_dir, &output)?;
            println!("Exported {} records from {} to {}", rows, log_dir.display(), output.display());
            Ok(())
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` directives apply on top of the configured level. The returned
/// guard must be held for the life of the process to flush the file writer.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", config.level))?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let (file_writer, guard) = if config.file_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.file_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(writer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
        }))
        .init();

    Ok(guard)
}

async fn run(config: Config) -> Result<()> {
    info!("Balloon Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let store = TelemetryStore::from_config(&config.store);
    let shutdown = Shutdown::new();

    let sink = if config.persistence.enabled {
        let sink = JsonlSink::from_config(&config.persistence)
            .with_context(|| format!("Failed to open record log in {}", config.persistence.log_dir))?;
        Some(SinkHandle::spawn(sink, config.persistence.queue_depth))
    } else {
        info!("Record log disabled");
        None
    };

    let console = spawn_console_observer(&store);

    let opener = SerialOpener::from_config(&config.serial);
    info!("Receiver port: {} at {} baud", opener.path(), config.serial.baud_rate);
    let ingestor = Ingestor::new(&config, opener, store.clone(), sink, shutdown.clone());
    let producer = tokio::spawn(ingestor.run());

    info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => error!("Unable to listen for Ctrl+C ({}), shutting down...", e),
    }

    shutdown.trigger();
    let stats = producer.await.context("Ingestion task panicked")?;
    console.abort();

    info!(
        "Total frames: {} ({} bytes, {} reconnects, {} not logged)",
        stats.frames, stats.bytes, stats.reconnects, stats.sink_dropped
    );
    Ok(())
}

/// Log every live event; stands in for a real dashboard client
fn spawn_console_observer(store: &TelemetryStore) -> JoinHandle<()> {
    let mut subscription = store.subscribe();
    info!(
        "Console observer {} attached (link {}, {} records in snapshot)",
        subscription.id,
        subscription.snapshot.link_status,
        subscription.snapshot.history.len()
    );

    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match &event {
                TelemetryEvent::TelemetryUpdate(record) => info!("{}", summarize(record)),
                TelemetryEvent::LinkStatusUpdate(status) => info!("Link status: {}", status),
            }
            if let Ok(json) = serde_json::to_string(&event) {
                debug!("{}", json);
            }
        }
    })
}

/// One-line human summary of a record
fn summarize(record: &TelemetryRecord) -> String {
    let mut parts = Vec::new();

    match &record.gps {
        Some(fix) => parts.push(format!("pos {:.5},{:.5}", fix.latitude, fix.longitude)),
        None => parts.push("no fix".to_string()),
    }
    if let Some(alt) = record.gps.as_ref().and_then(|g| g.altitude) {
        parts.push(format!("alt {:.0} m", alt));
    }
    if let Some(speed) = record.speed_kmh {
        parts.push(format!("{:.2} km/h", speed));
    }
    if let Some(t) = record.environment.as_ref().and_then(|e| e.temperature) {
        parts.push(format!("{:.1} C", t));
    }
    if let Some(oz) = record.ozone {
        parts.push(format!("O3 {}", oz));
    }
    if let Some(rssi) = record.rssi {
        parts.push(format!("RSSI {}", rssi));
    }
    if let Some(err) = &record.error {
        parts.push(format!("[{}]", err));
    }

    parts.join(" | ")
}
