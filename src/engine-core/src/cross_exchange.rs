//! Cross-exchange spread detector: compares top-of-book on both venues,
//! net of taker fees, for a matched market pair.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::book::LiveOrderBook;
use crate::models::{Direction, Platform, Signal, SignalType};

pub struct CrossExchangeDetector {
    pub min_spread: Decimal,
}

impl Default for CrossExchangeDetector {
    fn default() -> Self {
        Self { min_spread: dec!(0.015) }
    }
}

impl CrossExchangeDetector {
    pub async fn evaluate(
        &self,
        poly_book: &LiveOrderBook,
        kalshi_book: &LiveOrderBook,
        poly_market_id: &str,
        kalshi_market_id: &str,
    ) -> Option<Signal> {
        if !poly_book.is_synced().await || !kalshi_book.is_synced().await {
            return None;
        }

        let poly_ask = poly_book.best_ask().await?;
        let poly_bid = poly_book.best_bid().await?;
        let kalshi_ask = kalshi_book.best_ask().await?;
        let kalshi_bid = kalshi_book.best_bid().await?;

        let poly_fee = Platform::Polymarket.fee_rate();
        let kalshi_fee = Platform::Kalshi.fee_rate();

        let spread_poly_buy = kalshi_bid - poly_ask - poly_fee - kalshi_fee;
        let spread_kalshi_buy = poly_bid - kalshi_ask - kalshi_fee - poly_fee;
        let best_spread = spread_poly_buy.max(spread_kalshi_buy);

        if best_spread < self.min_spread {
            return None;
        }

        let (buy_platform, buy_market_id, buy_price, sell_platform, sell_market_id, sell_price, trade_platform, trade_market_id) =
            if spread_poly_buy >= spread_kalshi_buy {
                (
                    Platform::Polymarket,
                    poly_market_id.to_string(),
                    poly_ask,
                    Platform::Kalshi,
                    kalshi_market_id.to_string(),
                    kalshi_bid,
                    Platform::Polymarket,
                    poly_market_id.to_string(),
                )
            } else {
                (
                    Platform::Kalshi,
                    kalshi_market_id.to_string(),
                    kalshi_ask,
                    Platform::Polymarket,
                    poly_market_id.to_string(),
                    poly_bid,
                    Platform::Kalshi,
                    kalshi_market_id.to_string(),
                )
            };

        let strength = (best_spread / (self.min_spread * dec!(5))).min(Decimal::ONE);

        Some(Signal {
            signal_type: SignalType::CrossExchangeArb,
            direction: Direction::BuyYes,
            platform: trade_platform,
            market_id: trade_market_id,
            edge_estimate: best_spread,
            strength,
            metadata: serde_json::json!({
                "poly_ask": poly_ask.to_string(),
                "poly_bid": poly_bid.to_string(),
                "kalshi_ask": kalshi_ask.to_string(),
                "kalshi_bid": kalshi_bid.to_string(),
                "gross_spread": (sell_price - buy_price).to_string(),
                "net_spread": best_spread.to_string(),
                "min_spread_threshold": self.min_spread.to_string(),
                "buy_platform": buy_platform.as_str(),
                "sell_platform": sell_platform.as_str(),
                "buy_market_id": buy_market_id,
                "sell_market_id": sell_market_id,
                "buy_price": buy_price.to_string(),
                "sell_price": sell_price.to_string(),
            }),
            created_at: Utc::now(),
            fired: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;

    async fn book_with(price_ask: Decimal, price_bid: Decimal) -> std::sync::Arc<LiveOrderBook> {
        let book = LiveOrderBook::new(Platform::Polymarket, "M");
        book.apply_snapshot(
            vec![Level { price: price_bid, size: dec!(1000) }],
            vec![Level { price: price_ask, size: dec!(1000) }],
        )
        .await;
        book
    }

    #[tokio::test]
    async fn wide_spread_net_of_fees_fires() {
        let detector = CrossExchangeDetector::default();
        let poly = book_with(dec!(0.40), dec!(0.38)).await;
        let kalshi = book_with(dec!(0.70), dec!(0.68)).await;

        let signal = detector
            .evaluate(&poly, &kalshi, "POLY-1", "KAL-1")
            .await
            .expect("signal expected");
        assert_eq!(signal.direction, Direction::BuyYes);
        assert!(signal.edge_estimate >= detector.min_spread);
    }

    #[tokio::test]
    async fn spread_below_threshold_emits_nothing() {
        let detector = CrossExchangeDetector::default();
        let poly = book_with(dec!(0.50), dec!(0.495)).await;
        let kalshi = book_with(dec!(0.51), dec!(0.505)).await;

        assert!(detector.evaluate(&poly, &kalshi, "P", "K").await.is_none());
    }

    #[tokio::test]
    async fn unsynced_book_emits_nothing() {
        let detector = CrossExchangeDetector::default();
        let poly = LiveOrderBook::new(Platform::Polymarket, "P");
        let kalshi = book_with(dec!(0.70), dec!(0.68)).await;
        assert!(detector.evaluate(&poly, &kalshi, "P", "K").await.is_none());
    }

    #[tokio::test]
    async fn direction_picks_cheaper_buy_leg() {
        let detector = CrossExchangeDetector::default();
        // Buying on Kalshi and selling on Polymarket is the better leg here.
        let poly = book_with(dec!(0.90), dec!(0.88)).await;
        let kalshi = book_with(dec!(0.40), dec!(0.38)).await;

        let signal = detector
            .evaluate(&poly, &kalshi, "POLY-1", "KAL-1")
            .await
            .expect("signal expected");
        assert_eq!(signal.platform, Platform::Kalshi);
        assert_eq!(signal.market_id, "KAL-1");
    }
}
