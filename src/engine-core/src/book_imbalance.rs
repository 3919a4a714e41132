//! Book-imbalance detector: fires when resting depth near the touch
//! leans heavily to one side of a single venue's book.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::book::LiveOrderBook;
use crate::models::{Direction, Signal, SignalType};

pub struct BookImbalanceDetector {
    pub bullish_threshold: Decimal,
    pub bearish_threshold: Decimal,
    pub depth_pct: Decimal,
    pub min_depth_usd: Decimal,
    pub sensitivity: Decimal,
}

impl Default for BookImbalanceDetector {
    fn default() -> Self {
        Self {
            bullish_threshold: dec!(0.65),
            bearish_threshold: dec!(0.35),
            depth_pct: dec!(0.05),
            min_depth_usd: dec!(500),
            sensitivity: dec!(0.20),
        }
    }
}

impl BookImbalanceDetector {
    pub async fn evaluate(&self, book: &LiveOrderBook) -> Option<Signal> {
        if !book.is_synced().await {
            return None;
        }

        let bid_vol = book.bid_depth(self.depth_pct).await;
        let ask_vol = book.ask_depth(self.depth_pct).await;
        let total_vol = bid_vol + ask_vol;

        if total_vol < self.min_depth_usd {
            debug!(market_id = %book.market_id, total_vol = %total_vol, "book_imbalance: depth below floor");
            return None;
        }

        let imbalance = bid_vol / total_vol;

        let (direction, edge, strength) = if imbalance > self.bullish_threshold {
            let strength = (imbalance - self.bullish_threshold) / (Decimal::ONE - self.bullish_threshold);
            (Direction::BuyYes, (imbalance - dec!(0.5)) * self.sensitivity, strength)
        } else if imbalance < self.bearish_threshold {
            let strength = (self.bearish_threshold - imbalance) / self.bearish_threshold;
            (Direction::BuyNo, (dec!(0.5) - imbalance) * self.sensitivity, strength)
        } else {
            return None;
        };

        let strength = strength.clamp(Decimal::ZERO, Decimal::ONE);
        let edge = edge.min(dec!(0.15));

        let best_bid = book.best_bid().await;
        let best_ask = book.best_ask().await;
        let spread = book.spread().await;

        Some(Signal {
            signal_type: SignalType::BookImbalance,
            direction,
            platform: book.platform,
            market_id: book.market_id.clone(),
            edge_estimate: edge,
            strength,
            metadata: serde_json::json!({
                "imbalance": imbalance.to_string(),
                "bid_vol": bid_vol.to_string(),
                "ask_vol": ask_vol.to_string(),
                "total_vol": total_vol.to_string(),
                "best_bid": best_bid.map(|d| d.to_string()),
                "best_ask": best_ask.map(|d| d.to_string()),
                "spread": spread.map(|d| d.to_string()),
                "depth_pct": self.depth_pct.to_string(),
            }),
            created_at: Utc::now(),
            fired: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Platform};

    async fn book_with(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> std::sync::Arc<LiveOrderBook> {
        let book = LiveOrderBook::new(Platform::Kalshi, "M");
        book.apply_snapshot(
            bids.into_iter().map(|(p, s)| Level { price: p, size: s }).collect(),
            asks.into_iter().map(|(p, s)| Level { price: p, size: s }).collect(),
        )
        .await;
        book
    }

    #[tokio::test]
    async fn bullish_imbalance_emits_buy_yes() {
        let detector = BookImbalanceDetector::default();
        let book = book_with(
            vec![(dec!(0.50), dec!(800))],
            vec![(dec!(0.52), dec!(200))],
        )
        .await;

        let signal = detector.evaluate(&book).await.expect("signal expected");
        assert_eq!(signal.direction, Direction::BuyYes);
        assert!(signal.edge_estimate > Decimal::ZERO);
    }

    #[tokio::test]
    async fn bearish_imbalance_emits_buy_no() {
        let detector = BookImbalanceDetector::default();
        let book = book_with(
            vec![(dec!(0.50), dec!(150))],
            vec![(dec!(0.52), dec!(850))],
        )
        .await;

        let signal = detector.evaluate(&book).await.expect("signal expected");
        assert_eq!(signal.direction, Direction::BuyNo);
    }

    #[tokio::test]
    async fn neutral_zone_emits_nothing() {
        let detector = BookImbalanceDetector::default();
        let book = book_with(
            vec![(dec!(0.50), dec!(550))],
            vec![(dec!(0.52), dec!(450))],
        )
        .await;
        assert!(detector.evaluate(&book).await.is_none());
    }

    #[tokio::test]
    async fn below_min_depth_emits_nothing_even_if_skewed() {
        let detector = BookImbalanceDetector::default();
        let book = book_with(vec![(dec!(0.50), dec!(100))], vec![(dec!(0.52), dec!(5))]).await;
        assert!(detector.evaluate(&book).await.is_none());
    }

    #[tokio::test]
    async fn unsynced_book_emits_nothing() {
        let detector = BookImbalanceDetector::default();
        let book = LiveOrderBook::new(Platform::Kalshi, "M");
        assert!(detector.evaluate(&book).await.is_none());
    }
}
