pub mod adapter;
pub mod book;
pub mod book_imbalance;
pub mod config;
pub mod cross_exchange;
pub mod error;
pub mod event_store;
pub mod kalshi_adapter;
pub mod models;
pub mod placement;
pub mod polymarket_adapter;
pub mod recorder;
pub mod risk;
pub mod signal_engine;
pub mod supervisor;

pub use book::LiveOrderBook;
pub use config::Config;
pub use models::{Decision, Direction, Order, OrderStatus, Platform, Side, Signal, SignalType};
pub use risk::RiskManager;
