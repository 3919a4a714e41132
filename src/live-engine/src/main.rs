//! Live trading entry point.
//!
//! Wires venue feeds, signal detectors, the risk manager, and the
//! recorder into a single process and runs until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use engine_core::config::Config;
use engine_core::event_store::EventStore;
use engine_core::placement::DryRunPlacementPort;
use engine_core::recorder::BookRecorder;
use engine_core::supervisor::{MarketPlan, Supervisor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Live market-making/arbitrage engine for Kalshi and Polymarket.
#[derive(Parser, Debug)]
#[command(name = "live-engine")]
#[command(about = "Runs the live order-book/signal/risk loop across Kalshi and Polymarket")]
struct Args {
    /// Simulate fills instead of placing real orders, regardless of config.
    #[arg(long)]
    dry_run: bool,

    /// Log verbosity when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file in addition to stderr.
    #[arg(long)]
    log_file: Option<String>,

    /// Seconds between market re-discovery passes (discovery itself is
    /// supplied externally; this only paces how often the plan refreshes).
    #[arg(long, default_value_t = 3600)]
    scan_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Held for the process lifetime: dropping it stops the background
    // flush thread and the rest of the file's buffered lines are lost.
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref());

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    // `--dry-run` overrides the config value; it never clears a config
    // that already asked for dry-run.
    config.dry_run = args.dry_run || config.dry_run;
    let dry_run = config.dry_run;

    info!(dry_run, scan_interval = args.scan_interval, "live-engine starting");

    let event_store = Arc::new(
        EventStore::connect(&config.event_store_path)
            .await
            .context("connecting to event store")?,
    );
    let recorder = Arc::new(BookRecorder::new(config.recordings_dir.clone()));

    let kalshi_port = if config.kalshi_enabled {
        Some(Arc::new(DryRunPlacementPort) as Arc<dyn engine_core::placement::PlacementPort>)
    } else {
        None
    };
    let polymarket_port = if config.polymarket_enabled {
        Some(Arc::new(DryRunPlacementPort) as Arc<dyn engine_core::placement::PlacementPort>)
    } else {
        None
    };
    if dry_run {
        info!("dry-run mode: orders will be simulated, not sent to a venue");
    }

    let supervisor = Supervisor::new(config, event_store, recorder, kalshi_port, polymarket_port);

    // Market discovery/listing against either venue is out of scope here;
    // an empty plan keeps the loop idle but alive until operators wire in
    // a concrete market list.
    let plan = MarketPlan::default();

    let cancel = CancellationToken::new();
    let shutdown_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    supervisor.run(plan, cancel).await;
    info!("live-engine stopped");
    Ok(())
}

fn init_logging(default_level: &str, log_file: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let filename = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("live-engine.log"));
            let file_appender = tracing_appender::rolling::never(dir, filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking);

            tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr_layer).init();
            None
        }
    }
}
