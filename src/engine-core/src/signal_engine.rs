//! Wires the two detectors to every registered book/arb pair and fans
//! out the resulting signals to downstream callbacks (risk + execution).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::book::LiveOrderBook;
use crate::book_imbalance::BookImbalanceDetector;
use crate::cross_exchange::CrossExchangeDetector;
use crate::event_store::EventStore;
use crate::models::Signal;

pub type SignalCallback = Arc<dyn Fn(&[Signal]) + Send + Sync>;

struct ArbPair {
    poly_book: Arc<LiveOrderBook>,
    kalshi_book: Arc<LiveOrderBook>,
    poly_market_id: String,
    kalshi_market_id: String,
}

pub struct SignalEngine {
    cross_exchange: CrossExchangeDetector,
    book_imbalance: BookImbalanceDetector,
    event_store: Option<Arc<EventStore>>,
    arb_pairs: Mutex<Vec<ArbPair>>,
    books: Mutex<Vec<Arc<LiveOrderBook>>>,
    callbacks: Mutex<Vec<SignalCallback>>,
}

impl SignalEngine {
    pub fn new(
        cross_exchange: CrossExchangeDetector,
        book_imbalance: BookImbalanceDetector,
        event_store: Option<Arc<EventStore>>,
    ) -> Self {
        Self {
            cross_exchange,
            book_imbalance,
            event_store,
            arb_pairs: Mutex::new(Vec::new()),
            books: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub async fn register_arb_pair(
        &self,
        poly_book: Arc<LiveOrderBook>,
        kalshi_book: Arc<LiveOrderBook>,
        poly_market_id: impl Into<String>,
        kalshi_market_id: impl Into<String>,
    ) {
        self.arb_pairs.lock().await.push(ArbPair {
            poly_book,
            kalshi_book,
            poly_market_id: poly_market_id.into(),
            kalshi_market_id: kalshi_market_id.into(),
        });
    }

    pub async fn register_book(&self, book: Arc<LiveOrderBook>) {
        self.books.lock().await.push(book);
    }

    pub async fn add_callback(&self, cb: SignalCallback) {
        self.callbacks.lock().await.push(cb);
    }

    /// Evaluate every registered arb pair and book once, returning the
    /// resulting signals sorted by strength descending. Every evaluated
    /// signal (fired or not) is persisted to the event store first.
    pub async fn evaluate_all(&self) -> Vec<Signal> {
        let mut signals = Vec::new();

        for pair in self.arb_pairs.lock().await.iter() {
            if let Some(signal) = self
                .cross_exchange
                .evaluate(&pair.poly_book, &pair.kalshi_book, &pair.poly_market_id, &pair.kalshi_market_id)
                .await
            {
                self.log_signal(&signal).await;
                signals.push(signal);
            }
        }

        for book in self.books.lock().await.iter() {
            if let Some(signal) = self.book_imbalance.evaluate(book).await {
                self.log_signal(&signal).await;
                signals.push(signal);
            }
        }

        signals.sort_by(|a, b| b.strength.cmp(&a.strength));

        if !signals.is_empty() {
            info!(count = signals.len(), "signal_engine: evaluated signals");
            let callbacks = self.callbacks.lock().await.clone();
            for cb in callbacks {
                let signals = &signals;
                if catch_unwind(AssertUnwindSafe(|| cb(signals))).is_err() {
                    warn!("signal_engine: callback panicked, skipping");
                }
            }
        }

        signals
    }

    async fn log_signal(&self, signal: &Signal) {
        if let Some(store) = &self.event_store {
            if let Err(e) = store.log_signal(signal, true).await {
                warn!(error = %e, "signal_engine: failed to log signal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Platform};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn synced_book(platform: Platform, bid: Decimal, ask: Decimal) -> Arc<LiveOrderBook> {
        let book = LiveOrderBook::new(platform, "M");
        book.apply_snapshot(
            vec![Level { price: bid, size: dec!(1000) }],
            vec![Level { price: ask, size: dec!(1000) }],
        )
        .await;
        book
    }

    use rust_decimal::Decimal;

    #[tokio::test]
    async fn evaluate_all_sorts_by_strength_and_invokes_callbacks() {
        let engine = SignalEngine::new(CrossExchangeDetector::default(), BookImbalanceDetector::default(), None);

        let poly = synced_book(Platform::Polymarket, dec!(0.38), dec!(0.40)).await;
        let kalshi = synced_book(Platform::Kalshi, dec!(0.68), dec!(0.70)).await;
        engine.register_arb_pair(poly, kalshi, "P", "K").await;

        let skewed = LiveOrderBook::new(Platform::Kalshi, "M2");
        skewed
            .apply_snapshot(
                vec![Level { price: dec!(0.50), size: dec!(900) }],
                vec![Level { price: dec!(0.52), size: dec!(100) }],
            )
            .await;
        engine.register_book(skewed).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        engine
            .add_callback(Arc::new(move |signals: &[Signal]| {
                calls2.fetch_add(signals.len(), Ordering::SeqCst);
            }))
            .await;

        let signals = engine.evaluate_all().await;
        assert_eq!(signals.len(), 2);
        assert!(signals[0].strength >= signals[1].strength);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_signals_skips_callback_invocation() {
        let engine = SignalEngine::new(CrossExchangeDetector::default(), BookImbalanceDetector::default(), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        engine
            .add_callback(Arc::new(move |_: &[Signal]| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        let signals = engine.evaluate_all().await;
        assert!(signals.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
