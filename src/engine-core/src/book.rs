//! Live in-memory order book, maintained from venue snapshot/delta frames.
//!
//! Mutating operations take the book's lock; callbacks fire after the lock
//! is released so a callback that queries the book back does not deadlock.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::{Level, Platform};

/// Which side of the book an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Called with the book after every mutation. Receives an `Arc` (rather
/// than a bare reference) so a callback can hand the book off to a
/// spawned task — the recorder does exactly this. Failures are logged
/// and skipped; they never prevent other callbacks from running.
pub type BookCallback = Arc<dyn Fn(Arc<LiveOrderBook>) + Send + Sync>;

struct BookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_updated: Option<DateTime<Utc>>,
    is_synced: bool,
}

impl Default for BookState {
    fn default() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_updated: None,
            is_synced: false,
        }
    }
}

/// Thread-safe in-memory order book for one (platform, market_id).
pub struct LiveOrderBook {
    pub platform: Platform,
    pub market_id: String,
    state: Mutex<BookState>,
    callbacks: Mutex<Vec<BookCallback>>,
    self_ref: Weak<LiveOrderBook>,
}

impl LiveOrderBook {
    /// Always `Arc`-allocated: callbacks need to recover an owned handle
    /// to the book they were fired from.
    pub fn new(platform: Platform, market_id: impl Into<String>) -> Arc<Self> {
        let market_id = market_id.into();
        Arc::new_cyclic(|weak| Self {
            platform,
            market_id,
            state: Mutex::new(BookState::default()),
            callbacks: Mutex::new(Vec::new()),
            self_ref: weak.clone(),
        })
    }

    /// Register a callback to fire on every update. Used both for
    /// per-book registration and to copy an adapter's global callbacks
    /// onto a newly created book.
    pub async fn add_callback(&self, cb: BookCallback) {
        self.callbacks.lock().await.push(cb);
    }

    /// Replace both sides wholesale. Levels with size <= 0 are dropped.
    pub async fn apply_snapshot(&self, bids: Vec<Level>, asks: Vec<Level>) {
        {
            let mut state = self.state.lock().await;
            state.bids = bids
                .into_iter()
                .filter(|l| l.size > Decimal::ZERO)
                .map(|l| (l.price, l.size))
                .collect();
            state.asks = asks
                .into_iter()
                .filter(|l| l.size > Decimal::ZERO)
                .map(|l| (l.price, l.size))
                .collect();
            state.last_updated = Some(Utc::now());
            state.is_synced = true;
        }
        self.fire_callbacks().await;
    }

    /// Set a level to an absolute size; size <= 0 removes it.
    pub async fn apply_delta(&self, side: BookSide, price: Decimal, new_size: Decimal) {
        {
            let mut state = self.state.lock().await;
            let book = match side {
                BookSide::Bid => &mut state.bids,
                BookSide::Ask => &mut state.asks,
            };
            if new_size <= Decimal::ZERO {
                book.remove(&price);
            } else {
                book.insert(price, new_size);
            }
            state.last_updated = Some(Utc::now());
        }
        self.fire_callbacks().await;
    }

    /// Add `delta` to the existing size at `price` (0 if absent); size <= 0
    /// removes the level.
    pub async fn apply_delta_increment(&self, side: BookSide, price: Decimal, delta: Decimal) {
        {
            let mut state = self.state.lock().await;
            let book = match side {
                BookSide::Bid => &mut state.bids,
                BookSide::Ask => &mut state.asks,
            };
            let current = book.get(&price).copied().unwrap_or(Decimal::ZERO);
            let new_size = current + delta;
            if new_size <= Decimal::ZERO {
                book.remove(&price);
            } else {
                book.insert(price, new_size);
            }
            state.last_updated = Some(Utc::now());
        }
        self.fire_callbacks().await;
    }

    pub async fn is_synced(&self) -> bool {
        self.state.lock().await.is_synced
    }

    pub async fn best_bid(&self) -> Option<Decimal> {
        self.state.lock().await.bids.keys().next_back().copied()
    }

    pub async fn best_ask(&self) -> Option<Decimal> {
        self.state.lock().await.asks.keys().next().copied()
    }

    pub async fn spread(&self) -> Option<Decimal> {
        let state = self.state.lock().await;
        let bid = state.bids.keys().next_back().copied();
        let ask = state.asks.keys().next().copied();
        match (bid, ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        }
    }

    pub async fn mid(&self) -> Option<Decimal> {
        let state = self.state.lock().await;
        let bid = state.bids.keys().next_back().copied();
        let ask = state.asks.keys().next().copied();
        match (bid, ask) {
            (Some(b), Some(a)) => Some((a + b) / Decimal::TWO),
            (None, Some(a)) => Some(a),
            (Some(b), None) => Some(b),
            (None, None) => None,
        }
    }

    /// Total bid-side size within `depth_pct` (fractional) of the best bid.
    pub async fn bid_depth(&self, depth_pct: Decimal) -> Decimal {
        let state = self.state.lock().await;
        let Some(best) = state.bids.keys().next_back().copied() else {
            return Decimal::ZERO;
        };
        let cutoff = best * (Decimal::ONE - depth_pct);
        state
            .bids
            .iter()
            .filter(|(p, _)| **p >= cutoff)
            .map(|(_, s)| *s)
            .sum()
    }

    /// Total ask-side size within `depth_pct` (fractional) of the best ask.
    pub async fn ask_depth(&self, depth_pct: Decimal) -> Decimal {
        let state = self.state.lock().await;
        let Some(best) = state.asks.keys().next().copied() else {
            return Decimal::ZERO;
        };
        let cutoff = best * (Decimal::ONE + depth_pct);
        state
            .asks
            .iter()
            .filter(|(p, _)| **p <= cutoff)
            .map(|(_, s)| *s)
            .sum()
    }

    /// bid_vol / (bid_vol + ask_vol) near the touch; 0.5 when both sides
    /// are empty.
    pub async fn imbalance(&self, depth_pct: Decimal) -> Decimal {
        let bid_vol = self.bid_depth(depth_pct).await;
        let ask_vol = self.ask_depth(depth_pct).await;
        let total = bid_vol + ask_vol;
        if total > Decimal::ZERO {
            bid_vol / total
        } else {
            Decimal::new(5, 1)
        }
    }

    /// A serializable view for the recorder: bids sorted descending, asks
    /// ascending.
    pub async fn snapshot(&self) -> BookSnapshot {
        let state = self.state.lock().await;
        BookSnapshot {
            platform: self.platform,
            market_id: self.market_id.clone(),
            bids: state.bids.iter().rev().map(|(p, s)| (*p, *s)).collect(),
            asks: state.asks.iter().map(|(p, s)| (*p, *s)).collect(),
            last_updated: state.last_updated,
            is_synced: state.is_synced,
        }
    }

    async fn fire_callbacks(&self) {
        let callbacks = self.callbacks.lock().await.clone();
        if callbacks.is_empty() {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        for cb in callbacks {
            let book = this.clone();
            if catch_unwind(AssertUnwindSafe(|| cb(book))).is_err() {
                warn!(
                    market_id = %this.market_id,
                    platform = ?this.platform,
                    "book: callback panicked, skipping"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub platform: Platform,
    pub market_id: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_synced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> Level {
        Level { price, size }
    }

    #[tokio::test]
    async fn snapshot_sets_synced_and_canonical_levels() {
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        book.apply_snapshot(
            vec![level(dec!(0.55), dec!(200)), level(dec!(0.54), dec!(300))],
            vec![level(dec!(0.60), dec!(100))],
        )
        .await;

        assert!(book.is_synced().await);
        assert_eq!(book.best_bid().await, Some(dec!(0.55)));
        assert_eq!(book.best_ask().await, Some(dec!(0.60)));
        assert_eq!(book.spread().await, Some(dec!(0.05)));
        assert_eq!(book.mid().await, Some(dec!(0.575)));
    }

    #[tokio::test]
    async fn snapshot_drops_non_positive_sizes() {
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        book.apply_snapshot(
            vec![level(dec!(0.5), dec!(0)), level(dec!(0.4), dec!(10))],
            vec![],
        )
        .await;
        assert_eq!(book.best_bid().await, Some(dec!(0.4)));
    }

    #[tokio::test]
    async fn delta_increment_removes_level_at_zero() {
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        book.apply_snapshot(vec![level(dec!(0.55), dec!(100))], vec![]).await;
        book.apply_delta_increment(BookSide::Bid, dec!(0.55), dec!(50)).await;
        assert_eq!(book.best_bid().await, Some(dec!(0.55)));

        book.apply_delta_increment(BookSide::Bid, dec!(0.55), dec!(-150)).await;
        assert_eq!(book.best_bid().await, None);
    }

    #[tokio::test]
    async fn delta_rollup_removes_ask_leg() {
        // Mirrors scenario S2: starting from S1, a NO delta of -100 at
        // price 40 removes the canonical ask at 0.60.
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        book.apply_snapshot(
            vec![level(dec!(0.55), dec!(200)), level(dec!(0.54), dec!(300))],
            vec![level(dec!(0.60), dec!(100))],
        )
        .await;
        book.apply_delta_increment(BookSide::Ask, dec!(0.60), dec!(-100)).await;

        assert_eq!(book.best_ask().await, None);
        assert_eq!(book.mid().await, Some(dec!(0.55)));
    }

    #[tokio::test]
    async fn imbalance_defaults_to_half_when_empty() {
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        assert_eq!(book.imbalance(dec!(0.05)).await, dec!(0.5));
    }

    #[tokio::test]
    async fn callback_fires_once_per_mutation_and_survives_panic_free_errors() {
        let book = LiveOrderBook::new(Platform::Kalshi, "K");
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        book.add_callback(Arc::new(move |_| {
            count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }))
        .await;

        book.apply_snapshot(vec![level(dec!(0.5), dec!(10))], vec![]).await;
        book.apply_delta(BookSide::Bid, dec!(0.5), dec!(20)).await;

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
