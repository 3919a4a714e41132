//! Shared value types that flow between the book, signal engine, risk
//! manager, and stores.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two venues the engine trades across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Kalshi,
    Polymarket,
}

impl Platform {
    /// One-way fee as a fraction of notional.
    pub fn fee_rate(&self) -> Decimal {
        use rust_decimal_macros::dec;
        match self {
            Platform::Kalshi => dec!(0.07),
            Platform::Polymarket => dec!(0.02),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kalshi => "kalshi",
            Platform::Polymarket => "polymarket",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kalshi" => Some(Platform::Kalshi),
            "polymarket" => Some(Platform::Polymarket),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the binary outcome a signal or order refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

/// Detector that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    CrossExchangeArb,
    BookImbalance,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::CrossExchangeArb => "cross_exchange_arb",
            SignalType::BookImbalance => "book_imbalance",
        }
    }
}

/// Trade direction recommended by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    BuyYes,
    BuyNo,
    Skip,
}

/// An immutable record produced by a detector. `fired` is set by the
/// signal engine once the risk manager has been consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub direction: Direction,
    pub platform: Platform,
    pub market_id: String,
    pub edge_estimate: Decimal,
    pub strength: Decimal,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub fired: bool,
}

impl Signal {
    /// Convenience accessor mirroring the metadata field the risk manager
    /// derives its entry price estimate from.
    pub fn metadata_best_bid(&self) -> Option<Decimal> {
        self.metadata
            .get("best_bid")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Filled,
    Partial,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Partial => "partial",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

/// An order intent, from signal approval through placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub market_id: String,
    pub platform: Platform,
    pub side: Side,
    pub limit_price: Decimal,
    pub size_usd: Decimal,
    pub dry_run: bool,
    pub order_id: Option<String>,
    pub status: OrderStatus,
}

/// Outcome of a `RiskManager::check` call.
#[derive(Debug, Clone)]
pub struct Decision {
    pub approved: bool,
    pub position_size_usd: Decimal,
    pub kelly_fraction: Decimal,
    pub reason: Option<String>,
    pub check_log: Vec<String>,
}

impl Decision {
    pub fn reject(reason: impl Into<String>, check_log: Vec<String>) -> Self {
        Self {
            approved: false,
            position_size_usd: Decimal::ZERO,
            kelly_fraction: Decimal::ZERO,
            reason: Some(reason.into()),
            check_log,
        }
    }

    pub fn approve(position_size_usd: Decimal, kelly_fraction: Decimal, check_log: Vec<String>) -> Self {
        Self {
            approved: true,
            position_size_usd,
            kelly_fraction,
            reason: None,
            check_log,
        }
    }
}

/// A single bid/ask level for recording and snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}
