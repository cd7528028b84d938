use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use common::{Analysis, Decision, Error, Order, PairKey, Result, Setting};

use crate::{StorageClient, SEEDED_SETTINGS};

/// Durable storage backend on SQLite.
///
/// Decimals and timestamps are stored as TEXT (exact decimal strings,
/// RFC 3339). Diagnostics maps are stored as JSON.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to the database at `url` (e.g. `sqlite://tickerbot.db` or
    /// `sqlite::memory:`).
    ///
    /// A single connection is used: in-memory databases are per-connection,
    /// and one connection also serializes the pair-level read-then-write
    /// done by order gating.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        info!(url, "SQLite storage connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageClient for SqliteStorage {
    async fn migrate_all(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;

        for name in SEEDED_SETTINGS {
            sqlx::query("INSERT OR IGNORE INTO settings (name, value) VALUES (?1, '')")
                .bind(name)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM orders").execute(&self.pool).await?;
        sqlx::query("DELETE FROM settings").execute(&self.pool).await?;
        sqlx::query("DELETE FROM analyses").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_all_settings(&self) -> Result<HashMap<String, Setting>> {
        let rows = sqlx::query("SELECT name, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut settings = HashMap::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            let value: String = row.try_get("value")?;
            settings.insert(name.clone(), Setting::new(name, value));
        }
        Ok(settings)
    }

    async fn get_setting(&self, name: &str) -> Result<Setting> {
        let row = sqlx::query("SELECT value FROM settings WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Setting::new(name, row.try_get::<String, _>("value")?),
            None => Setting::new(name, ""),
        })
    }

    async fn update_setting(&self, name: &str, value: &str) -> Result<Setting> {
        self.store_setting(name, value).await?;
        Ok(Setting::new(name, value))
    }

    async fn store_setting(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (name, value) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT strategy, symbol, decision, quantity, price, diagnostics, \
             timeframe, successful, created_at FROM orders ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn get_last_order(&self, strategy: &str, symbol: &str) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT strategy, symbol, decision, quantity, price, diagnostics, \
             timeframe, successful, created_at FROM orders \
             WHERE strategy = ?1 AND symbol = ?2 ORDER BY id DESC LIMIT 1",
        )
        .bind(strategy)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn store_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (strategy, symbol, decision, quantity, price, \
             diagnostics, timeframe, successful, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&order.strategy)
        .bind(&order.symbol)
        .bind(order.decision)
        .bind(order.quantity.to_string())
        .bind(order.price.to_string())
        .bind(serde_json::to_string(&order.diagnostics)?)
        .bind(&order.timeframe)
        .bind(order.successful)
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_analyses(&self, analyses: &BTreeMap<PairKey, Analysis>) -> Result<()> {
        for a in analyses.values() {
            sqlx::query(
                "INSERT INTO analyses (strategy, symbol, buys, sells, successful_sells, \
                 profit, success_rate, timeframe, window_start, window_end, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(&a.strategy)
            .bind(&a.symbol)
            .bind(a.buys)
            .bind(a.sells)
            .bind(a.successful_sells)
            .bind(a.profit.to_string())
            .bind(a.success_rate)
            .bind(&a.timeframe)
            .bind(a.start.to_rfc3339())
            .bind(a.end.to_rfc3339())
            .bind(a.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn order_from_row(row: SqliteRow) -> Result<Order> {
    Ok(Order {
        strategy: row.try_get("strategy")?,
        symbol: row.try_get("symbol")?,
        decision: row.try_get::<Decision, _>("decision")?,
        quantity: row.try_get::<String, _>("quantity")?.parse::<Decimal>()?,
        price: row.try_get::<String, _>("price")?.parse::<Decimal>()?,
        diagnostics: serde_json::from_str(&row.try_get::<String, _>("diagnostics")?)?,
        timeframe: row.try_get("timeframe")?,
        successful: row.try_get("successful")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal_macros::dec;

    use common::{Decision, SELECTED_SYMBOLS};

    use super::*;

    async fn connect() -> SqliteStorage {
        let store = SqliteStorage::connect("sqlite::memory:").await.unwrap();
        store.migrate_all().await.unwrap();
        store
    }

    fn order(decision: Decision) -> Order {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("SMA0".to_string(), "5".to_string());
        Order::no_op("sma_cross", "LTCBTC", decision, diagnostics, "1m")
            .filled(dec!(5), dec!(50))
    }

    #[tokio::test]
    async fn order_round_trips_through_sqlite() {
        let store = connect().await;
        let stored = order(Decision::Buy);
        store.store_order(&stored).await.unwrap();

        let found = store
            .get_last_order("sma_cross", "LTCBTC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.decision, Decision::Buy);
        assert_eq!(found.quantity, dec!(5));
        assert_eq!(found.price, dec!(50));
        assert_eq!(found.diagnostics.get("SMA0").map(String::as_str), Some("5"));
        assert!(found.successful);
    }

    #[tokio::test]
    async fn last_order_scoped_and_ordered() {
        let store = connect().await;
        store.store_order(&order(Decision::Buy)).await.unwrap();
        store.store_order(&order(Decision::Sell)).await.unwrap();

        let found = store
            .get_last_order("sma_cross", "LTCBTC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.decision, Decision::Sell);
        assert!(store
            .get_last_order("sma_cross", "ETHBTC")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn settings_upsert_and_seed() {
        let store = connect().await;
        let s = store.get_setting(SELECTED_SYMBOLS).await.unwrap();
        assert_eq!(s.value, "");

        store.update_setting(SELECTED_SYMBOLS, "LTCBTC,ETHBTC").await.unwrap();
        let s = store.get_setting(SELECTED_SYMBOLS).await.unwrap();
        assert_eq!(s.values(), vec!["LTCBTC", "ETHBTC"]);

        // Re-running migrations must not clobber the value.
        store.migrate_all().await.unwrap();
        let s = store.get_setting(SELECTED_SYMBOLS).await.unwrap();
        assert_eq!(s.values(), vec!["LTCBTC", "ETHBTC"]);
    }

    #[tokio::test]
    async fn drop_all_resets_the_database() {
        let store = connect().await;
        store.store_order(&order(Decision::Buy)).await.unwrap();
        store.drop_all().await.unwrap();
        assert!(store.get_all_orders().await.unwrap().is_empty());
        assert!(store.get_all_settings().await.unwrap().is_empty());
    }
}
