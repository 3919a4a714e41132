//! Generic venue adapter: connect, subscribe, dispatch, reconnect with
//! backoff. Concrete venues implement [`VenueAdapter`]; [`run_adapter_loop`]
//! owns the socket lifecycle so each venue only has to know its own wire
//! format.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::Request;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::book::{BookCallback, LiveOrderBook};
use crate::error::VenueError;
use crate::models::Platform;

const RECONNECT_DELAY_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(64);
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Concrete socket type every adapter subscribes over. Fixed (rather
/// than generic) so `VenueAdapter` stays object-safe and can be driven
/// behind `Arc<dyn VenueAdapter>`.
pub type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Venue-specific wire logic. `run_adapter_loop` drives the socket and
/// calls back into these methods; implementations hold no connection
/// state of their own.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// The websocket endpoint to connect to.
    fn ws_url(&self) -> String;

    /// Build the upgrade request, including any venue auth headers.
    fn build_request(&self) -> Result<Request<()>, VenueError>;

    /// Send the subscribe frame for the given market ids over an
    /// already-connected socket.
    async fn send_subscribe(&self, ws: &mut WsStream, market_ids: &[String]) -> Result<(), VenueError>;

    /// Parse one inbound text frame and apply it to the relevant book(s).
    async fn handle_message(&self, raw: &str);
}

/// Registry of live books for one adapter, keyed by market id. Shared
/// between the adapter's public accessors and `run_adapter_loop`.
pub struct BookRegistry {
    platform: Platform,
    books: Mutex<HashMap<String, Arc<LiveOrderBook>>>,
    global_callbacks: Mutex<Vec<BookCallback>>,
}

impl BookRegistry {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            books: Mutex::new(HashMap::new()),
            global_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback on every book that exists now, and on every
    /// book created later.
    pub async fn add_global_callback(&self, cb: BookCallback) {
        let books = self.books.lock().await;
        for book in books.values() {
            book.add_callback(cb.clone()).await;
        }
        drop(books);
        self.global_callbacks.lock().await.push(cb);
    }

    /// Fetch the book for a market id, creating it (with global callbacks
    /// already attached) if this is the first time it's seen.
    pub async fn get_or_create(&self, market_id: &str) -> Arc<LiveOrderBook> {
        let mut books = self.books.lock().await;
        if let Some(book) = books.get(market_id) {
            return book.clone();
        }
        let book = LiveOrderBook::new(self.platform, market_id.to_string());
        for cb in self.global_callbacks.lock().await.iter() {
            book.add_callback(cb.clone()).await;
        }
        books.insert(market_id.to_string(), book.clone());
        book
    }

    pub async fn get(&self, market_id: &str) -> Option<Arc<LiveOrderBook>> {
        self.books.lock().await.get(market_id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<LiveOrderBook>> {
        self.books.lock().await.values().cloned().collect()
    }

    pub async fn market_ids(&self) -> Vec<String> {
        self.books.lock().await.keys().cloned().collect()
    }
}

/// Drive an adapter's connect/subscribe/read loop until `cancel` fires.
/// Reconnects with exponential backoff (1s doubling to a 64s ceiling,
/// reset whenever a connection is established), matching the resilience
/// posture of a long-running feed handler.
pub async fn run_adapter_loop(
    adapter: Arc<dyn VenueAdapter>,
    market_ids: Vec<String>,
    cancel: CancellationToken,
) {
    let mut delay = RECONNECT_DELAY_INITIAL;

    while !cancel.is_cancelled() {
        match connect_and_stream(adapter.as_ref(), &market_ids, &cancel).await {
            Ok(()) => {
                delay = RECONNECT_DELAY_INITIAL;
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    break;
                }
                warn!(platform = %adapter.platform(), error = %err, "adapter connection dropped, reconnecting");
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
        delay = std::cmp::min(delay * 2, RECONNECT_DELAY_MAX);
    }

    info!(platform = %adapter.platform(), "adapter loop stopped");
}

async fn connect_and_stream(
    adapter: &dyn VenueAdapter,
    market_ids: &[String],
    cancel: &CancellationToken,
) -> Result<(), VenueError> {
    let request = adapter.build_request()?;
    let (mut ws, _response) = tokio::time::timeout(
        Duration::from_secs(10),
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| VenueError::Timeout)??;

    info!(platform = %adapter.platform(), "connected");
    adapter.send_subscribe(&mut ws, market_ids).await?;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Ok(());
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        adapter.handle_message(&text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(platform = %adapter.platform(), "connection closed");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(VenueError::Connection(err)),
                }
            }
        }
    }
}
