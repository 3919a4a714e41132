//! Wires every component together and drives the live loop: adapters
//! feed books, the signal engine evaluates on every mutation's batch
//! tick, a dedicated task owns the risk manager single-writer style and
//! dispatches approved signals to placement, and a snapshot loop records
//! portfolio state on an interval.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::run_adapter_loop;
use crate::book_imbalance::BookImbalanceDetector;
use crate::config::Config;
use crate::cross_exchange::CrossExchangeDetector;
use crate::event_store::EventStore;
use crate::kalshi_adapter::KalshiAdapter;
use crate::models::{Direction, Order, OrderStatus, Platform, Side, Signal};
use crate::placement::PlacementPort;
use crate::polymarket_adapter::PolymarketAdapter;
use crate::recorder::BookRecorder;
use crate::risk::RiskManager;
use crate::signal_engine::SignalEngine;

/// Static view of the markets to trade, supplied by the caller. Market
/// discovery/listing against either venue's REST API is out of scope
/// for this crate; a caller assembles this list however it likes
/// (config file, CLI flags, an external scanner) and hands it in.
#[derive(Debug, Clone, Default)]
pub struct MarketPlan {
    pub kalshi_market_ids: Vec<String>,
    /// (market_id, yes_token_id) pairs for Polymarket subscriptions.
    pub polymarket_markets: Vec<(String, String)>,
    /// (polymarket_market_id, kalshi_market_id) pairs to watch for
    /// cross-exchange spreads.
    pub arb_pairs: Vec<(String, String)>,
}

pub struct Supervisor {
    config: Config,
    event_store: Arc<EventStore>,
    recorder: Arc<BookRecorder>,
    kalshi_port: Option<Arc<dyn PlacementPort>>,
    polymarket_port: Option<Arc<dyn PlacementPort>>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        event_store: Arc<EventStore>,
        recorder: Arc<BookRecorder>,
        kalshi_port: Option<Arc<dyn PlacementPort>>,
        polymarket_port: Option<Arc<dyn PlacementPort>>,
    ) -> Self {
        Self { config, event_store, recorder, kalshi_port, polymarket_port }
    }

    /// Runs until `cancel` fires, then stops adapters, closes the
    /// recorder, and returns.
    pub async fn run(&self, plan: MarketPlan, cancel: CancellationToken) {
        let risk_manager = Arc::new(Mutex::new(RiskManager::new(
            self.config.bankroll_usd,
            self.config.kelly_fraction,
            self.config.max_position_fraction,
            self.config.max_total_exposure,
            self.config.min_edge_threshold,
            self.config.max_daily_loss_usd,
        )));

        let signal_engine = Arc::new(SignalEngine::new(
            CrossExchangeDetector { min_spread: self.config.min_edge_threshold },
            BookImbalanceDetector::default(),
            Some(self.event_store.clone()),
        ));

        let (tx, rx) = mpsc::unbounded_channel::<Vec<Signal>>();
        signal_engine
            .add_callback(Arc::new(move |signals: &[Signal]| {
                let _ = tx.send(signals.to_vec());
            }))
            .await;

        let kalshi_enabled = self.config.kalshi_enabled && self.kalshi_port.is_some();
        let polymarket_enabled = self.config.polymarket_enabled && self.polymarket_port.is_some();

        let kalshi_adapter = if kalshi_enabled {
            Some(Arc::new(KalshiAdapter::new(
                self.config.kalshi_api_key.clone().unwrap_or_default(),
                self.config.kalshi_api_secret.clone().unwrap_or_default(),
                self.config.kalshi_use_demo,
            )))
        } else {
            info!("kalshi adapter disabled");
            None
        };

        let polymarket_adapter = if polymarket_enabled {
            Some(Arc::new(PolymarketAdapter::new()))
        } else {
            info!("polymarket adapter disabled");
            None
        };

        if let Some(adapter) = &kalshi_adapter {
            let recorder = self.recorder.clone();
            let engine = signal_engine.clone();
            adapter
                .books
                .add_global_callback(Arc::new(move |book| {
                    recorder.on_book_update(book);
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.evaluate_all().await; });
                }))
                .await;
        }
        if let Some(adapter) = &polymarket_adapter {
            let recorder = self.recorder.clone();
            let engine = signal_engine.clone();
            adapter
                .books
                .add_global_callback(Arc::new(move |book| {
                    recorder.on_book_update(book);
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.evaluate_all().await; });
                }))
                .await;
            for (market_id, yes_token_id) in &plan.polymarket_markets {
                adapter.register_token_mapping(market_id.clone(), yes_token_id.clone()).await;
            }
        }

        for market_id in &plan.kalshi_market_ids {
            if let Some(adapter) = &kalshi_adapter {
                let book = adapter.books.get_or_create(market_id).await;
                signal_engine.register_book(book).await;
            }
        }
        for (market_id, _) in &plan.polymarket_markets {
            if let Some(adapter) = &polymarket_adapter {
                let book = adapter.books.get_or_create(market_id).await;
                signal_engine.register_book(book).await;
            }
        }

        if let (Some(kalshi), Some(poly)) = (&kalshi_adapter, &polymarket_adapter) {
            for (poly_market_id, kalshi_market_id) in &plan.arb_pairs {
                let poly_book = poly.books.get_or_create(poly_market_id).await;
                let kalshi_book = kalshi.books.get_or_create(kalshi_market_id).await;
                signal_engine
                    .register_arb_pair(poly_book, kalshi_book, poly_market_id.clone(), kalshi_market_id.clone())
                    .await;
            }
        }

        info!(
            kalshi_markets = plan.kalshi_market_ids.len(),
            poly_markets = plan.polymarket_markets.len(),
            arb_pairs = plan.arb_pairs.len(),
            dry_run = self.config.dry_run,
            "supervisor: starting live loop"
        );
        if self.config.dry_run {
            warn!("supervisor: running in dry-run mode, no real orders will be placed");
        }

        let mut tasks = tokio::task::JoinSet::new();

        tasks.spawn(Self::snapshot_loop(
            self.event_store.clone(),
            risk_manager.clone(),
            self.config.snapshot_interval_seconds,
            cancel.clone(),
        ));

        tasks.spawn(Self::risk_worker(
            risk_manager.clone(),
            self.event_store.clone(),
            self.kalshi_port.clone(),
            self.polymarket_port.clone(),
            self.config.dry_run,
            rx,
        ));

        if let Some(adapter) = kalshi_adapter.clone() {
            let adapter: Arc<dyn crate::adapter::VenueAdapter> = adapter;
            let ids = plan.kalshi_market_ids.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { run_adapter_loop(adapter, ids, cancel).await });
        }
        if let Some(adapter) = polymarket_adapter.clone() {
            let adapter: Arc<dyn crate::adapter::VenueAdapter> = adapter;
            let ids: Vec<String> = plan.polymarket_markets.iter().map(|(m, _)| m.clone()).collect();
            let cancel = cancel.clone();
            tasks.spawn(async move { run_adapter_loop(adapter, ids, cancel).await });
        }

        cancel.cancelled().await;
        while tasks.join_next().await.is_some() {}
        self.recorder.close();
        info!("supervisor: stopped");
    }

    async fn snapshot_loop(
        event_store: Arc<EventStore>,
        risk_manager: Arc<Mutex<RiskManager>>,
        interval_seconds: u64,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let (bankroll, exposure, open_count, daily_pnl) = {
                        let mut manager = risk_manager.lock().await;
                        (manager.bankroll(), manager.total_exposure_usd(), manager.open_position_count() as i64, manager.daily_pnl())
                    };
                    if let Err(e) = event_store.snapshot(bankroll, exposure, open_count, daily_pnl, daily_pnl).await {
                        warn!(error = %e, "supervisor: snapshot write failed");
                    } else {
                        info!(%bankroll, %exposure, open_count, %daily_pnl, "supervisor: snapshot recorded");
                    }
                }
            }
        }
    }

    async fn risk_worker(
        risk_manager: Arc<Mutex<RiskManager>>,
        event_store: Arc<EventStore>,
        kalshi_port: Option<Arc<dyn PlacementPort>>,
        polymarket_port: Option<Arc<dyn PlacementPort>>,
        dry_run: bool,
        mut rx: mpsc::UnboundedReceiver<Vec<Signal>>,
    ) {
        while let Some(signals) = rx.recv().await {
            for signal in signals {
                if signal.direction == Direction::Skip {
                    continue;
                }

                let decision = risk_manager.lock().await.check(&signal);
                if !decision.approved {
                    info!(
                        market_id = %signal.market_id,
                        reason = ?decision.reason,
                        "supervisor: signal rejected"
                    );
                    continue;
                }

                let port = match signal.platform {
                    Platform::Kalshi => kalshi_port.clone(),
                    Platform::Polymarket => polymarket_port.clone(),
                };
                let Some(port) = port else {
                    warn!(platform = %signal.platform, "supervisor: no placement port configured, skipping");
                    continue;
                };

                let side = match signal.direction {
                    Direction::BuyYes => Side::Yes,
                    _ => Side::No,
                };
                let limit_price = signal_entry_price(&signal);

                let order_row = match event_store
                    .log_order(
                        signal.platform.as_str(),
                        &signal.market_id,
                        side.as_str(),
                        limit_price,
                        decision.position_size_usd,
                        None,
                        "SUBMITTING",
                    )
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        error!(error = %e, "supervisor: failed to log order");
                        continue;
                    }
                };

                let order = Order {
                    market_id: signal.market_id.clone(),
                    platform: signal.platform,
                    side,
                    limit_price,
                    size_usd: decision.position_size_usd,
                    dry_run,
                    order_id: None,
                    status: OrderStatus::Open,
                };

                match port.place(order).await {
                    Ok(filled) => {
                        if let Err(e) = event_store
                            .update_order_status(order_row, filled.status.as_str(), filled.order_id.as_deref())
                            .await
                        {
                            warn!(error = %e, order_row, "supervisor: failed to update order status");
                        }
                        if let Err(e) =
                            event_store.log_fill(order_row, filled.limit_price, decision.position_size_usd, limit_price).await
                        {
                            warn!(error = %e, order_row, "supervisor: failed to log fill");
                        }
                        risk_manager.lock().await.record_open(signal.market_id.clone(), decision.position_size_usd);
                        info!(market_id = %signal.market_id, size_usd = %decision.position_size_usd, "supervisor: position opened");
                    }
                    Err(e) => {
                        if let Err(e) = event_store.update_order_status(order_row, "failed", None).await {
                            warn!(error = %e, order_row, "supervisor: failed to update order status");
                        }
                        error!(market_id = %signal.market_id, error = %e, "supervisor: placement failed");
                    }
                }
            }
        }
    }
}

fn signal_entry_price(signal: &Signal) -> Decimal {
    signal
        .metadata
        .get("buy_price")
        .or_else(|| signal.metadata.get("best_ask"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(rust_decimal_macros::dec!(0.50))
}

