use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use common::{
    Analysis, Candle, Error, PairKey, Result, SELECTED_STRATEGIES, SELECTED_SYMBOLS,
};
use output::{StubWriter, Writer};
use storage::{MemoryStorage, StorageClient};
use strategy::StrategyRegistry;
use trader::Trader;

use crate::feed::{ReplayClient, ReplayFeed};
use crate::loader;

/// Minimum candle count a strategy window gets by default.
const DEFAULT_WINDOW: usize = 60;

/// Parameters of one backtest run.
#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub strategies: Vec<String>,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub data_dir: PathBuf,
    pub buy_notional: Decimal,
}

/// Replays recorded candles through the same coordinator and gating logic
/// that live sessions use.
///
/// Every run gets a fresh in-memory scratch store, so backtest state never
/// contaminates live storage; on failure the partially filled scratch store
/// is simply dropped.
pub struct BacktestEngine {
    registry: StrategyRegistry,
    window: usize,
}

impl BacktestEngine {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self {
            registry,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        assert!(window > 0, "window must be positive");
        self.window = window;
        self
    }

    /// Load the historical series named by the request and replay them.
    pub async fn run(&self, request: &BacktestRequest) -> Result<BTreeMap<PairKey, Analysis>> {
        if request.end <= request.start {
            return Err(Error::WrongDateOrder);
        }
        if request.symbols.is_empty() {
            return Err(Error::NoSymbolsSelected);
        }

        let mut series = HashMap::new();
        for symbol in &request.symbols {
            let path = loader::series_path(
                &request.data_dir,
                symbol,
                &request.timeframe,
                request.start,
                request.end,
            );
            series.insert(symbol.clone(), loader::load_series(&path)?);
        }

        self.replay(series, request).await
    }

    /// Replay already loaded candle series.
    ///
    /// Emits exactly `len - window` triggers. The cursor advances only after
    /// a trigger has been fully processed, and is rewound at the end so the
    /// feed could serve another run.
    pub async fn replay(
        &self,
        series: HashMap<String, Vec<Candle>>,
        request: &BacktestRequest,
    ) -> Result<BTreeMap<PairKey, Analysis>> {
        if request.strategies.is_empty() {
            return Err(Error::NoStrategiesSelected);
        }

        let feed = Arc::new(ReplayFeed::new(series, self.window));
        let scratch = Arc::new(MemoryStorage::new());
        scratch.migrate_all().await?;
        scratch
            .update_setting(SELECTED_SYMBOLS, &request.symbols.join(","))
            .await?;
        scratch
            .update_setting(SELECTED_STRATEGIES, &request.strategies.join(","))
            .await?;

        let trader = Trader::new(
            Arc::new(ReplayClient::new(feed.clone())),
            scratch.clone(),
            self.registry.clone(),
            request.timeframe.clone(),
            request.buy_notional,
        );
        let writer: Arc<dyn Writer> = Arc::new(StubWriter);

        let steps = feed.steps();
        info!(
            steps,
            window = self.window,
            symbols = request.symbols.len(),
            strategies = request.strategies.len(),
            "Backtest replay started"
        );

        for _ in 0..steps {
            trader.run_once(&writer).await?;
            feed.advance();
        }
        feed.reset();

        let orders = scratch.get_all_orders().await?;
        let analyses = analysis::aggregate(&orders, request.start, request.end);
        scratch.store_analyses(&analyses).await?;

        info!(
            orders = orders.len(),
            pairs = analyses.len(),
            "Backtest replay finished"
        );
        Ok(analyses)
    }
}
