use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{Analysis, Order, PairKey, Result, Setting};

use crate::{StorageClient, SEEDED_SETTINGS};

/// In-memory storage backend.
///
/// Every backtest run gets a fresh instance as its scratch store, so replay
/// state can never contaminate the live database.
#[derive(Default)]
pub struct MemoryStorage {
    orders: RwLock<Vec<Order>>,
    settings: RwLock<HashMap<String, Setting>>,
    analyses: RwLock<Vec<Analysis>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn migrate_all(&self) -> Result<()> {
        let mut settings = self.settings.write().await;
        for name in SEEDED_SETTINGS {
            settings
                .entry(name.to_string())
                .or_insert_with(|| Setting::new(name, ""));
        }
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.orders.write().await.clear();
        self.settings.write().await.clear();
        self.analyses.write().await.clear();
        Ok(())
    }

    async fn get_all_settings(&self) -> Result<HashMap<String, Setting>> {
        Ok(self.settings.read().await.clone())
    }

    async fn get_setting(&self, name: &str) -> Result<Setting> {
        Ok(self
            .settings
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| Setting::new(name, "")))
    }

    async fn update_setting(&self, name: &str, value: &str) -> Result<Setting> {
        let setting = Setting::new(name, value);
        self.settings
            .write()
            .await
            .insert(name.to_string(), setting.clone());
        Ok(setting)
    }

    async fn store_setting(&self, name: &str, value: &str) -> Result<()> {
        self.settings
            .write()
            .await
            .insert(name.to_string(), Setting::new(name, value));
        Ok(())
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.read().await.clone())
    }

    async fn get_last_order(&self, strategy: &str, symbol: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .rev()
            .find(|o| o.strategy == strategy && o.symbol == symbol)
            .cloned())
    }

    async fn store_order(&self, order: &Order) -> Result<()> {
        self.orders.write().await.push(order.clone());
        Ok(())
    }

    async fn store_analyses(&self, analyses: &BTreeMap<PairKey, Analysis>) -> Result<()> {
        self.analyses
            .write()
            .await
            .extend(analyses.values().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal_macros::dec;

    use common::{Decision, SELECTED_SYMBOLS};

    use super::*;

    fn order(strategy: &str, symbol: &str, decision: Decision) -> Order {
        Order::no_op(strategy, symbol, decision, BTreeMap::new(), "1m").filled(dec!(1), dec!(10))
    }

    #[tokio::test]
    async fn last_order_is_scoped_to_the_pair() {
        let store = MemoryStorage::new();
        store.store_order(&order("a", "LTCBTC", Decision::Buy)).await.unwrap();
        store.store_order(&order("b", "LTCBTC", Decision::Sell)).await.unwrap();
        store.store_order(&order("a", "ETHBTC", Decision::Sell)).await.unwrap();

        let found = store.get_last_order("a", "LTCBTC").await.unwrap().unwrap();
        assert_eq!(found.decision, Decision::Buy);
        assert_eq!(found.strategy, "a");
        assert_eq!(found.symbol, "LTCBTC");
    }

    #[tokio::test]
    async fn last_order_none_when_pair_has_no_history() {
        let store = MemoryStorage::new();
        store.store_order(&order("a", "LTCBTC", Decision::Buy)).await.unwrap();
        assert!(store.get_last_order("a", "ETHBTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_order_returns_the_newest_entry() {
        let store = MemoryStorage::new();
        store.store_order(&order("a", "LTCBTC", Decision::Buy)).await.unwrap();
        store.store_order(&order("a", "LTCBTC", Decision::Sell)).await.unwrap();

        let found = store.get_last_order("a", "LTCBTC").await.unwrap().unwrap();
        assert_eq!(found.decision, Decision::Sell);
    }

    #[tokio::test]
    async fn migrate_seeds_settings_without_clobbering() {
        let store = MemoryStorage::new();
        store.update_setting(SELECTED_SYMBOLS, "LTCBTC").await.unwrap();
        store.migrate_all().await.unwrap();

        let s = store.get_setting(SELECTED_SYMBOLS).await.unwrap();
        assert_eq!(s.values(), vec!["LTCBTC"]);

        let all = store.get_all_settings().await.unwrap();
        assert!(all.contains_key(common::SELECTED_STRATEGIES));
        assert!(all.contains_key(common::AVAILABLE_STRATEGIES));
    }

    #[tokio::test]
    async fn drop_all_clears_everything() {
        let store = MemoryStorage::new();
        store.migrate_all().await.unwrap();
        store.store_order(&order("a", "LTCBTC", Decision::Buy)).await.unwrap();
        store.drop_all().await.unwrap();

        assert!(store.get_all_orders().await.unwrap().is_empty());
        assert!(store.get_all_settings().await.unwrap().is_empty());
    }
}
