use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use common::{Balance, Candle, Decision, ExchangeClient, OrderAck, Result};

use crate::BinanceClient;

/// Dry-run exchange client: serves real market data but acknowledges orders
/// locally without ever submitting them.
pub struct SimClient {
    live: BinanceClient,
    next_order_id: AtomicI64,
}

impl SimClient {
    pub fn new() -> Self {
        Self {
            live: BinanceClient::new("", ""),
            next_order_id: AtomicI64::new(1),
        }
    }
}

impl Default for SimClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for SimClient {
    async fn get_candles(&self, symbol: &str, timeframe: &str) -> Result<Vec<Candle>> {
        self.live.get_candles(symbol, timeframe).await
    }

    async fn create_order(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        side: Decision,
    ) -> Result<OrderAck> {
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        debug!(symbol, %side, %quantity, %price, order_id, "Simulated order accepted");
        Ok(OrderAck {
            symbol: symbol.to_string(),
            order_id,
            client_order_id: format!("sim-{order_id}"),
            status: "FILLED".to_string(),
        })
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        self.live.list_symbols().await
    }

    async fn get_balances(&self, _assets: &[String]) -> Result<Vec<Balance>> {
        Ok(Vec::new())
    }
}
