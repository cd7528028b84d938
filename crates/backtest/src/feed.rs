use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use common::{Balance, Candle, Decision, Error, ExchangeClient, OrderAck, Result};

/// Pre-loaded historical candle series plus the replay cursor.
///
/// The cursor belongs to exactly one backtest run: the engine advances it
/// after each fully processed trigger and resets it on completion. All
/// symbols share one position, so every pair sees the same point in time.
pub struct ReplayFeed {
    series: HashMap<String, Vec<Candle>>,
    window: usize,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn new(series: HashMap<String, Vec<Candle>>, window: usize) -> Self {
        Self {
            series,
            window,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Length of the shortest loaded series.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of triggers one replay of this feed produces.
    pub fn steps(&self) -> usize {
        self.len().saturating_sub(self.window)
    }

    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Move the replay one candle forward. Called by the engine after a
    /// trigger has been fully processed, never from the data path.
    pub fn advance(&self) {
        self.cursor.fetch_add(1, Ordering::SeqCst);
    }

    /// Rewind so the feed can be reused for another run.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }

    /// The current window of candles for one symbol.
    pub fn slice(&self, symbol: &str) -> Result<Vec<Candle>> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))?;

        let cursor = self.position();
        let end = cursor + self.window;
        if end > series.len() {
            return Err(Error::Exchange(format!(
                "replay window [{cursor}, {end}) out of range for {symbol} ({} candles)",
                series.len()
            )));
        }
        Ok(series[cursor..end].to_vec())
    }
}

/// Exchange client backed by a `ReplayFeed`. Orders are acknowledged
/// locally; the market never moves except through the feed's cursor.
pub struct ReplayClient {
    feed: Arc<ReplayFeed>,
}

impl ReplayClient {
    pub fn new(feed: Arc<ReplayFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ExchangeClient for ReplayClient {
    async fn get_candles(&self, symbol: &str, _timeframe: &str) -> Result<Vec<Candle>> {
        self.feed.slice(symbol)
    }

    async fn create_order(
        &self,
        symbol: &str,
        _quantity: Decimal,
        _price: Decimal,
        _side: Decision,
    ) -> Result<OrderAck> {
        Ok(OrderAck {
            symbol: symbol.to_string(),
            order_id: self.feed.position() as i64,
            client_order_id: format!("replay-{}", self.feed.position()),
            status: "FILLED".to_string(),
        })
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = self.feed.series.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn get_balances(&self, _assets: &[String]) -> Result<Vec<Balance>> {
        Ok(Vec::new())
    }
}
