//! Polymarket CLOB market feed: no auth, token<->market id mapping, and
//! book/price_change frame dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::Request;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::adapter::{BookRegistry, VenueAdapter};
use crate::book::BookSide;
use crate::error::VenueError;
use crate::models::{Level, Platform};

const WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/";

pub struct PolymarketAdapter {
    market_to_token: Mutex<HashMap<String, String>>,
    token_to_market: Mutex<HashMap<String, String>>,
    pub books: Arc<BookRegistry>,
}

impl PolymarketAdapter {
    pub fn new() -> Self {
        Self {
            market_to_token: Mutex::new(HashMap::new()),
            token_to_market: Mutex::new(HashMap::new()),
            books: Arc::new(BookRegistry::new(Platform::Polymarket)),
        }
    }

    /// Record the yes-token for a market id so subscribe frames and
    /// inbound frames can be translated in both directions.
    pub async fn register_token_mapping(&self, market_id: impl Into<String>, yes_token_id: impl Into<String>) {
        let market_id = market_id.into();
        let yes_token_id = yes_token_id.into();
        self.market_to_token.lock().await.insert(market_id.clone(), yes_token_id.clone());
        self.token_to_market.lock().await.insert(yes_token_id, market_id);
    }

    async fn resolve_market_id(&self, token_id: &str) -> String {
        self.token_to_market
            .lock()
            .await
            .get(token_id)
            .cloned()
            .unwrap_or_else(|| token_id.to_string())
    }
}

impl Default for PolymarketAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn platform(&self) -> Platform {
        Platform::Polymarket
    }

    fn ws_url(&self) -> String {
        WS_URL.to_string()
    }

    fn build_request(&self) -> Result<Request<()>, VenueError> {
        Request::builder()
            .uri(WS_URL)
            .body(())
            .map_err(|e| VenueError::Request(e.to_string()))
    }

    async fn send_subscribe(&self, ws: &mut crate::adapter::WsStream, market_ids: &[String]) -> Result<(), VenueError> {
        use futures_util::SinkExt;
        let map = self.market_to_token.lock().await;
        let token_ids: Vec<String> = market_ids
            .iter()
            .map(|id| map.get(id).cloned().unwrap_or_else(|| id.clone()))
            .collect();
        drop(map);

        let frame = serde_json::json!({ "assets_ids": token_ids, "type": "Market" });
        ws.send(Message::Text(frame.to_string().into()))
            .await
            .map_err(VenueError::Connection)
    }

    async fn handle_message(&self, raw: &str) {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                debug!("polymarket: dropping undecodable frame");
                return;
            }
        };

        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    self.dispatch(item).await;
                }
            }
            obj @ serde_json::Value::Object(_) => self.dispatch(obj).await,
            _ => {}
        }
    }
}

impl PolymarketAdapter {
    async fn dispatch(&self, msg: serde_json::Value) {
        let event_type = msg
            .get("event_type")
            .or_else(|| msg.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match event_type {
            "book" => self.handle_book_snapshot(msg).await,
            "price_change" => self.handle_price_change(msg).await,
            "tick_size_change" => {}
            other => debug!(event_type = other, "polymarket: unhandled event"),
        }
    }

    async fn handle_book_snapshot(&self, msg: serde_json::Value) {
        let Some(token_id) = msg.get("asset_id").and_then(|v| v.as_str()) else {
            return;
        };
        let market_id = self.resolve_market_id(token_id).await;
        let book = self.books.get_or_create(&market_id).await;

        let bids = parse_price_size_levels(msg.get("bids"));
        let asks = parse_price_size_levels(msg.get("asks"));
        book.apply_snapshot(bids, asks).await;
    }

    async fn handle_price_change(&self, msg: serde_json::Value) {
        let Some(token_id) = msg.get("asset_id").and_then(|v| v.as_str()) else {
            return;
        };
        let market_id = self.resolve_market_id(token_id).await;
        let book = self.books.get_or_create(&market_id).await;

        let Some(changes) = msg.get("changes").and_then(|v| v.as_array()) else {
            return;
        };
        for change in changes {
            let side_raw = change.get("side").and_then(|v| v.as_str()).unwrap_or("").to_uppercase();
            let side = if side_raw == "BUY" { BookSide::Bid } else { BookSide::Ask };
            let price = parse_decimal(change.get("price"));
            let size = parse_decimal(change.get("size"));
            book.apply_delta(side, price, size).await;
        }
    }
}

fn parse_price_size_levels(value: Option<&serde_json::Value>) -> Vec<Level> {
    let Some(arr) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .map(|entry| Level {
            price: parse_decimal(entry.get("price")),
            size: parse_decimal(entry.get("size")),
        })
        .collect()
}

fn parse_decimal(value: Option<&serde_json::Value>) -> Decimal {
    value
        .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_f64().map(|f| f.to_string())))
        .and_then(|s| s.parse().ok())
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ChangeFrame {
    side: String,
    price: String,
    size: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn subscribe_maps_market_id_to_token() {
        let adapter = PolymarketAdapter::new();
        adapter.register_token_mapping("MKT-1", "token-abc").await;

        let map = adapter.market_to_token.lock().await;
        assert_eq!(map.get("MKT-1").unwrap(), "token-abc");
    }

    #[tokio::test]
    async fn book_snapshot_resolves_market_id_from_token() {
        let adapter = PolymarketAdapter::new();
        adapter.register_token_mapping("MKT-1", "token-abc").await;

        let frame = serde_json::json!({
            "event_type": "book",
            "asset_id": "token-abc",
            "bids": [{"price": "0.52", "size": "100"}],
            "asks": [{"price": "0.55", "size": "80"}],
        });
        adapter.handle_message(&frame.to_string()).await;

        let book = adapter.books.get("MKT-1").await.unwrap();
        assert_eq!(book.best_bid().await, Some(dec!(0.52)));
        assert_eq!(book.best_ask().await, Some(dec!(0.55)));
    }

    #[tokio::test]
    async fn price_change_is_absolute_assignment_not_increment() {
        let adapter = PolymarketAdapter::new();
        adapter.register_token_mapping("MKT-1", "token-abc").await;

        let snapshot = serde_json::json!({
            "event_type": "book",
            "asset_id": "token-abc",
            "bids": [{"price": "0.52", "size": "100"}],
            "asks": [],
        });
        adapter.handle_message(&snapshot.to_string()).await;

        let change = serde_json::json!({
            "event_type": "price_change",
            "asset_id": "token-abc",
            "changes": [{"side": "BUY", "price": "0.52", "size": "0.00"}],
        });
        adapter.handle_message(&change.to_string()).await;

        let book = adapter.books.get("MKT-1").await.unwrap();
        assert_eq!(book.best_bid().await, None);
    }

    #[tokio::test]
    async fn unmapped_market_id_falls_back_to_token_id() {
        let adapter = PolymarketAdapter::new();
        let frame = serde_json::json!({
            "event_type": "book",
            "asset_id": "bare-token",
            "bids": [],
            "asks": [],
        });
        adapter.handle_message(&frame.to_string()).await;
        assert!(adapter.books.get("bare-token").await.is_some());
    }
}
