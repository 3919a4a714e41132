//! Kalshi orderbook-delta feed: HMAC-SHA256 request signing, yes/no level
//! translation into the canonical bid/ask convention.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use http::Request;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::adapter::{BookRegistry, VenueAdapter};
use crate::book::BookSide;
use crate::error::VenueError;
use crate::models::{Level, Platform};

const WS_URL_PROD: &str = "wss://trading-api.kalshi.com/trade-api/ws/v2";
const WS_URL_DEMO: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";
const WS_PATH: &str = "/trade-api/ws/v2";

pub struct KalshiAdapter {
    api_key: String,
    api_secret: String,
    use_demo: bool,
    seq: std::sync::atomic::AtomicU64,
    pub books: Arc<BookRegistry>,
}

impl KalshiAdapter {
    pub fn new(api_key: String, api_secret: String, use_demo: bool) -> Self {
        Self {
            api_key,
            api_secret,
            use_demo,
            seq: std::sync::atomic::AtomicU64::new(0),
            books: Arc::new(BookRegistry::new(Platform::Kalshi)),
        }
    }

    fn sign(&self, ts_ms: &str) -> Result<String, VenueError> {
        let message = format!("{ts_ms}GET{WS_PATH}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| VenueError::Auth(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn platform(&self) -> Platform {
        Platform::Kalshi
    }

    fn ws_url(&self) -> String {
        if self.use_demo { WS_URL_DEMO } else { WS_URL_PROD }.to_string()
    }

    fn build_request(&self) -> Result<Request<()>, VenueError> {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| VenueError::Auth(e.to_string()))?
            .as_millis()
            .to_string();
        let signature = self.sign(&ts_ms)?;

        Request::builder()
            .uri(self.ws_url())
            .header("KALSHI-ACCESS-KEY", &self.api_key)
            .header("KALSHI-ACCESS-TIMESTAMP", &ts_ms)
            .header("KALSHI-ACCESS-SIGNATURE", &signature)
            .body(())
            .map_err(|e| VenueError::Request(e.to_string()))
    }

    async fn send_subscribe(&self, ws: &mut crate::adapter::WsStream, market_ids: &[String]) -> Result<(), VenueError> {
        use futures_util::SinkExt;
        let id = self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let frame = serde_json::json!({
            "id": id,
            "cmd": "subscribe",
            "params": {
                "channels": ["orderbook_delta"],
                "market_tickers": market_ids,
            }
        });
        ws.send(Message::Text(frame.to_string().into()))
            .await
            .map_err(VenueError::Connection)
    }

    async fn handle_message(&self, raw: &str) {
        let data: KalshiFrame = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                debug!("kalshi: dropping undecodable frame");
                return;
            }
        };

        match data.msg_type.as_str() {
            "orderbook_snapshot" => self.handle_snapshot(data.msg).await,
            "orderbook_delta" => self.handle_delta(data.msg).await,
            "subscribed" => debug!("kalshi: subscribed"),
            "error" => error!(?data.msg, "kalshi: error frame"),
            _ => {}
        }
    }
}

impl KalshiAdapter {
    async fn handle_snapshot(&self, msg: serde_json::Value) {
        let Some(ticker) = msg.get("market_ticker").and_then(|v| v.as_str()) else {
            return;
        };
        let book = self.books.get_or_create(ticker).await;

        let yes_levels = parse_levels(msg.get("yes"));
        let no_levels = parse_levels(msg.get("no"));

        let bids = yes_levels
            .into_iter()
            .map(|(p, s)| Level { price: p / rust_decimal_macros::dec!(100), size: s })
            .collect();
        let asks = no_levels
            .into_iter()
            .map(|(p, s)| Level { price: (rust_decimal_macros::dec!(100) - p) / rust_decimal_macros::dec!(100), size: s })
            .collect();

        book.apply_snapshot(bids, asks).await;
    }

    async fn handle_delta(&self, msg: serde_json::Value) {
        let Some(ticker) = msg.get("market_ticker").and_then(|v| v.as_str()) else {
            return;
        };
        let side = msg.get("side").and_then(|v| v.as_str()).unwrap_or("yes");
        let price_cents: Decimal = msg
            .get("price")
            .and_then(|v| v.as_f64())
            .map(Decimal::try_from)
            .and_then(Result::ok)
            .unwrap_or(Decimal::ZERO);
        let delta: Decimal = msg
            .get("delta")
            .and_then(|v| v.as_f64())
            .map(Decimal::try_from)
            .and_then(Result::ok)
            .unwrap_or(Decimal::ZERO);

        let book = self.books.get_or_create(ticker).await;

        if side == "yes" {
            book.apply_delta_increment(BookSide::Bid, price_cents / rust_decimal_macros::dec!(100), delta)
                .await;
        } else {
            let yes_ask_price = (rust_decimal_macros::dec!(100) - price_cents) / rust_decimal_macros::dec!(100);
            book.apply_delta_increment(BookSide::Ask, yes_ask_price, delta).await;
        }
    }
}

fn parse_levels(value: Option<&serde_json::Value>) -> Vec<(Decimal, Decimal)> {
    let Some(arr) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            let price = pair.first()?.as_f64()?;
            let size = pair.get(1)?.as_f64()?;
            Some((Decimal::try_from(price).ok()?, Decimal::try_from(size).ok()?))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct KalshiFrame {
    #[serde(rename = "type", default)]
    msg_type: String,
    #[serde(default)]
    msg: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn snapshot_translates_yes_no_to_bid_ask() {
        let adapter = KalshiAdapter::new("k".into(), "s".into(), false);
        let frame = serde_json::json!({
            "type": "orderbook_snapshot",
            "msg": {
                "market_ticker": "PRES-2028",
                "yes": [[55, 200], [54, 300]],
                "no": [[40, 100]],
            }
        });
        adapter.handle_message(&frame.to_string()).await;

        let book = adapter.books.get("PRES-2028").await.unwrap();
        assert_eq!(book.best_bid().await, Some(dec!(0.55)));
        assert_eq!(book.best_ask().await, Some(dec!(0.60)));
    }

    #[tokio::test]
    async fn delta_on_no_side_reduces_yes_ask() {
        let adapter = KalshiAdapter::new("k".into(), "s".into(), false);
        let snapshot = serde_json::json!({
            "type": "orderbook_snapshot",
            "msg": {"market_ticker": "T", "yes": [[55, 200]], "no": [[40, 100]]}
        });
        adapter.handle_message(&snapshot.to_string()).await;

        let delta = serde_json::json!({
            "type": "orderbook_delta",
            "msg": {"market_ticker": "T", "side": "no", "price": 40, "delta": -100}
        });
        adapter.handle_message(&delta.to_string()).await;

        let book = adapter.books.get("T").await.unwrap();
        assert_eq!(book.best_ask().await, None);
    }

    #[test]
    fn signature_is_base64_hmac_sha256() {
        let adapter = KalshiAdapter::new("key".into(), "secret".into(), false);
        let sig = adapter.sign("1000").unwrap();
        assert!(!sig.is_empty());
        assert!(STANDARD.decode(&sig).is_ok());
    }
}
