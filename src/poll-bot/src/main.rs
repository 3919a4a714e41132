//! Polling-bot entry point.
//!
//! The slower Bayesian detection pipeline this peers with is out of
//! scope for this crate; what lives here is the plumbing a polling
//! strategy shares with the live engine — config, risk manager, event
//! store, and recorder — on a coarser interval than the live loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use engine_core::config::Config;
use engine_core::event_store::EventStore;
use engine_core::recorder::BookRecorder;
use engine_core::risk::RiskManager;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "poll-bot")]
#[command(about = "Polling-cadence peer to live-engine, sharing its risk manager and recorder")]
struct Args {
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("loading configuration")?;
    let event_store = Arc::new(EventStore::connect(&config.event_store_path).await.context("connecting to event store")?);
    let _recorder = Arc::new(BookRecorder::new(config.recordings_dir.clone()));
    let mut risk_manager = RiskManager::new(
        config.bankroll_usd,
        config.kelly_fraction,
        config.max_position_fraction,
        config.max_total_exposure,
        config.min_edge_threshold,
        config.max_daily_loss_usd,
    );

    info!(poll_interval = config.poll_interval_seconds, "poll-bot starting");

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.poll_interval_seconds));
    loop {
        ticker.tick().await;
        let bankroll = risk_manager.bankroll();
        let daily_pnl = risk_manager.daily_pnl();
        event_store
            .snapshot(bankroll, risk_manager.total_exposure_usd(), risk_manager.open_position_count() as i64, daily_pnl, daily_pnl)
            .await
            .ok();
        info!(%bankroll, %daily_pnl, "poll-bot: tick (detection pipeline not wired in this crate)");
    }
}
