//! Order placement is an external concern (the regulated-exchange and
//! on-chain order-entry clients live outside this crate); this module
//! defines the seam and a dry-run stand-in for local/paper use.

use async_trait::async_trait;
use tracing::info;

use crate::error::PlacementError;
use crate::models::{Order, OrderStatus};

/// The boundary between this engine and an exchange's order-entry API.
/// Production implementations live outside this crate (REST clients
/// with venue-specific auth); this trait is the seam the supervisor
/// drives against.
#[async_trait]
pub trait PlacementPort: Send + Sync {
    async fn place(&self, order: Order) -> Result<Order, PlacementError>;
}

/// Marks every order filled at its limit price without contacting a
/// venue. Used when the engine runs with `dry_run = true`.
pub struct DryRunPlacementPort;

#[async_trait]
impl PlacementPort for DryRunPlacementPort {
    async fn place(&self, mut order: Order) -> Result<Order, PlacementError> {
        info!(market_id = %order.market_id, size_usd = %order.size_usd, "dry run: simulating fill");
        order.status = OrderStatus::Filled;
        order.order_id = Some(format!("dry-run-{}", uuid::Uuid::new_v4()));
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Side};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn dry_run_port_fills_at_limit_price() {
        let port = DryRunPlacementPort;
        let order = Order {
            market_id: "M".to_string(),
            platform: Platform::Kalshi,
            side: Side::Yes,
            limit_price: dec!(0.50),
            size_usd: dec!(25),
            dry_run: true,
            order_id: None,
            status: OrderStatus::Open,
        };

        let filled = port.place(order).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(filled.order_id.is_some());
    }
}
