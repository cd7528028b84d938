pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use common::{Analysis, Order, PairKey, Result, Setting};

/// Storage capability consumed by the coordinator and the backtest engine.
///
/// `SqliteStorage` is the durable backend for live sessions; `MemoryStorage`
/// backs backtests and tests. Both are interchangeable behind this trait and
/// neither leaks into the other's state.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Prepare the schema and seed the well-known settings.
    async fn migrate_all(&self) -> Result<()>;

    /// Administrative reset: discard all orders, settings and analyses.
    async fn drop_all(&self) -> Result<()>;

    async fn get_all_settings(&self) -> Result<HashMap<String, Setting>>;

    /// Missing settings read as present-but-empty.
    async fn get_setting(&self, name: &str) -> Result<Setting>;

    async fn update_setting(&self, name: &str, value: &str) -> Result<Setting>;

    async fn store_setting(&self, name: &str, value: &str) -> Result<()>;

    /// All stored orders in insertion order.
    async fn get_all_orders(&self) -> Result<Vec<Order>>;

    /// Newest stored order for exactly this (strategy, symbol) pair.
    /// `None` means the pair is flat; it is not an error.
    async fn get_last_order(&self, strategy: &str, symbol: &str) -> Result<Option<Order>>;

    async fn store_order(&self, order: &Order) -> Result<()>;

    async fn store_analyses(&self, analyses: &BTreeMap<PairKey, Analysis>) -> Result<()>;
}

/// Setting names seeded by `migrate_all`.
pub(crate) const SEEDED_SETTINGS: [&str; 3] = [
    common::SELECTED_SYMBOLS,
    common::SELECTED_STRATEGIES,
    common::AVAILABLE_STRATEGIES,
];
