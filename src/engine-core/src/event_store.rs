//! SQLite-backed event store: signals, orders, fills, realized pnl, and
//! periodic portfolio snapshots, for replay and post-hoc analysis.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::error::StoreError;
use crate::models::Signal;

pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        // SQLite is single-writer; one pooled connection avoids
        // cross-connection visibility surprises (especially for
        // `:memory:` databases, where each connection is a separate db).
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                signal_type TEXT,
                direction TEXT,
                platform TEXT,
                market_id TEXT,
                edge_estimate REAL,
                strength REAL,
                fired INTEGER,
                metadata_json TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                platform TEXT,
                market_id TEXT,
                side TEXT,
                expected_price REAL,
                size_usd REAL,
                order_id TEXT,
                status TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER REFERENCES orders(id),
                ts TEXT NOT NULL,
                fill_price REAL,
                fill_size REAL,
                slippage REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pnl (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                market_id TEXT,
                platform TEXT,
                entry_price REAL,
                exit_price REAL,
                size_usd REAL,
                pnl_usd REAL,
                holding_seconds REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS summary_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                bankroll REAL,
                total_exposure REAL,
                open_positions INTEGER,
                daily_pnl REAL,
                total_pnl REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_ts ON signals(ts)").execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_market ON signals(market_id)").execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_ts ON orders(ts)").execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pnl_ts ON pnl(ts)").execute(&self.pool).await?;
        // Not present in the reference implementation this store was
        // modeled on; included because it's named explicitly in this
        // schema's canonical definition.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pnl_market ON pnl(market_id)").execute(&self.pool).await?;

        Ok(())
    }

    pub async fn log_signal(&self, signal: &Signal, fired: bool) -> Result<i64, StoreError> {
        let metadata_json = serde_json::to_string(&signal.metadata).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(
            "INSERT INTO signals (ts, signal_type, direction, platform, market_id, edge_estimate, strength, fired, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(signal.signal_type.as_str())
        .bind(format!("{:?}", signal.direction))
        .bind(signal.platform.as_str())
        .bind(&signal.market_id)
        .bind(signal.edge_estimate.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(signal.strength.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(fired as i32)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn log_order(
        &self,
        platform: &str,
        market_id: &str,
        side: &str,
        expected_price: Decimal,
        size_usd: Decimal,
        order_id: Option<&str>,
        status: &str,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO orders (ts, platform, market_id, side, expected_price, size_usd, order_id, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(platform)
        .bind(market_id)
        .bind(side)
        .bind(expected_price.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(size_usd.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(order_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_order_status(
        &self,
        order_row_id: i64,
        status: &str,
        order_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(order_id) = order_id {
            sqlx::query("UPDATE orders SET status = ?, order_id = ? WHERE id = ?")
                .bind(status)
                .bind(order_id)
                .bind(order_row_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE orders SET status = ? WHERE id = ?")
                .bind(status)
                .bind(order_row_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn log_fill(
        &self,
        order_row_id: i64,
        fill_price: Decimal,
        fill_size: Decimal,
        expected_price: Decimal,
    ) -> Result<(), StoreError> {
        let slippage = fill_price - expected_price;
        sqlx::query(
            "INSERT INTO fills (order_id, ts, fill_price, fill_size, slippage) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order_row_id)
        .bind(Utc::now().to_rfc3339())
        .bind(fill_price.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(fill_size.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(slippage.to_string().parse::<f64>().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;

        if slippage.abs() > Decimal::new(5, 3) {
            warn!(%order_row_id, %slippage, "event_store: fill slippage exceeds tolerance");
        }
        Ok(())
    }

    pub async fn log_pnl(
        &self,
        market_id: &str,
        platform: &str,
        entry_price: Decimal,
        exit_price: Decimal,
        size_usd: Decimal,
        pnl_usd: Decimal,
        holding_seconds: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pnl (ts, market_id, platform, entry_price, exit_price, size_usd, pnl_usd, holding_seconds)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(market_id)
        .bind(platform)
        .bind(entry_price.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(exit_price.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(size_usd.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(pnl_usd.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(holding_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn snapshot(
        &self,
        bankroll: Decimal,
        total_exposure: Decimal,
        open_positions: i64,
        daily_pnl: Decimal,
        total_pnl: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO summary_snapshots (ts, bankroll, total_exposure, open_positions, daily_pnl, total_pnl)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(bankroll.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(total_exposure.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(open_positions)
        .bind(daily_pnl.to_string().parse::<f64>().unwrap_or(0.0))
        .bind(total_pnl.to_string().parse::<f64>().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_daily_pnl(&self, date_str: Option<&str>) -> Result<Decimal, StoreError> {
        let date_str = date_str.map(str::to_string).unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let pattern = format!("{date_str}%");
        let row = sqlx::query("SELECT COALESCE(SUM(pnl_usd), 0.0) AS total FROM pnl WHERE ts LIKE ?")
            .bind(pattern)
            .fetch_one(&self.pool)
            .await?;
        let total: f64 = row.try_get("total")?;
        Ok(Decimal::try_from(total).unwrap_or(Decimal::ZERO))
    }

    pub async fn get_avg_slippage(&self) -> Result<Decimal, StoreError> {
        let row = sqlx::query("SELECT AVG(slippage) AS avg_slippage FROM fills")
            .fetch_one(&self.pool)
            .await?;
        let avg: Option<f64> = row.try_get("avg_slippage")?;
        Ok(avg.and_then(|v| Decimal::try_from(v).ok()).unwrap_or(Decimal::ZERO))
    }

    pub async fn get_signal_hit_rate(&self, signal_type: Option<&str>) -> Result<SignalHitRate, StoreError> {
        let rows = if let Some(signal_type) = signal_type {
            sqlx::query("SELECT fired, COUNT(*) AS n FROM signals WHERE signal_type = ? GROUP BY fired")
                .bind(signal_type)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT fired, COUNT(*) AS n FROM signals GROUP BY fired")
                .fetch_all(&self.pool)
                .await?
        };

        let mut fired = 0i64;
        let mut not_fired = 0i64;
        for row in rows {
            let is_fired: i64 = row.try_get("fired")?;
            let n: i64 = row.try_get("n")?;
            if is_fired != 0 {
                fired = n;
            } else {
                not_fired = n;
            }
        }

        let total = fired + not_fired;
        let hit_rate = if total > 0 { fired as f64 / total as f64 } else { 0.0 };

        Ok(SignalHitRate { fired, not_fired, hit_rate })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalHitRate {
    pub fired: i64,
    pub not_fired: i64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Platform, SignalType};
    use rust_decimal_macros::dec;

    fn sample_signal() -> Signal {
        Signal {
            signal_type: SignalType::BookImbalance,
            direction: Direction::BuyYes,
            platform: Platform::Kalshi,
            market_id: "M".to_string(),
            edge_estimate: dec!(0.03),
            strength: dec!(0.5),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            fired: false,
        }
    }

    #[tokio::test]
    async fn logs_signal_and_reports_hit_rate() {
        let store = EventStore::connect(":memory:").await.unwrap();
        store.log_signal(&sample_signal(), true).await.unwrap();
        store.log_signal(&sample_signal(), false).await.unwrap();

        let hit_rate = store.get_signal_hit_rate(None).await.unwrap();
        assert_eq!(hit_rate.fired, 1);
        assert_eq!(hit_rate.not_fired, 1);
        assert_eq!(hit_rate.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn order_lifecycle_and_fill_slippage_warning() {
        let store = EventStore::connect(":memory:").await.unwrap();
        let order_id = store
            .log_order("kalshi", "M", "yes", dec!(0.50), dec!(25), None, "SUBMITTING")
            .await
            .unwrap();

        store.update_order_status(order_id, "FILLED", Some("ext-1")).await.unwrap();
        store.log_fill(order_id, dec!(0.51), dec!(25), dec!(0.50)).await.unwrap();

        let avg = store.get_avg_slippage().await.unwrap();
        assert!(avg > Decimal::ZERO);
    }

    #[tokio::test]
    async fn daily_pnl_sums_todays_rows() {
        let store = EventStore::connect(":memory:").await.unwrap();
        store
            .log_pnl("M", "kalshi", dec!(0.50), dec!(0.55), dec!(25), dec!(1.25), 120.0)
            .await
            .unwrap();

        let total = store.get_daily_pnl(None).await.unwrap();
        assert_eq!(total, dec!(1.25));
    }
}
