use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Balance, Candle, Decision, OrderAck, Result};

/// Abstraction over the exchange connection.
///
/// `BinanceClient` implements this for live trading, `SimClient` for dry
/// runs against real market data, and the backtest replay client for
/// deterministic historical runs. The coordinator only ever sees this
/// trait.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most recent window of OHLCV candles for a symbol.
    async fn get_candles(&self, symbol: &str, timeframe: &str) -> Result<Vec<Candle>>;

    /// Submit an order and return the exchange acknowledgement.
    async fn create_order(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        side: Decision,
    ) -> Result<OrderAck>;

    /// All symbols tradable on the exchange.
    async fn list_symbols(&self) -> Result<Vec<String>>;

    /// Balances for the given assets.
    async fn get_balances(&self, assets: &[String]) -> Result<Vec<Balance>>;
}
