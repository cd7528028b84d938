use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use common::{
    timeframe_duration, Candle, Decision, Error, ExchangeClient, Order, Result,
    SELECTED_STRATEGIES, SELECTED_SYMBOLS,
};
use output::Writer;
use storage::StorageClient;
use strategy::StrategyRegistry;

/// Trading session coordinator.
///
/// Owns the run/stop lifecycle and the periodic fan-out over the configured
/// symbol × strategy matrix. One trigger is in flight at a time: the next
/// tick is not examined until the previous trigger's fan-in and batch write
/// have completed.
///
/// Cloning is cheap and clones share the running flag and stop signal, so a
/// handle can issue `stop` from a different task than the one that called
/// `start`.
#[derive(Clone)]
pub struct Trader {
    exchange: Arc<dyn ExchangeClient>,
    storage: Arc<dyn StorageClient>,
    registry: StrategyRegistry,
    timeframe: String,
    /// Fixed quote-currency budget spent on every buy.
    buy_notional: Decimal,
    /// Time between triggers: one sixth of the candle duration.
    tick: Duration,
    running: Arc<AtomicBool>,
    stop_tx: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl Trader {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        storage: Arc<dyn StorageClient>,
        registry: StrategyRegistry,
        timeframe: impl Into<String>,
        buy_notional: Decimal,
    ) -> Self {
        let timeframe = timeframe.into();
        let tick = timeframe_duration(&timeframe)
            .unwrap_or(Duration::from_secs(60))
            / 6;
        Self {
            exchange,
            storage,
            registry,
            timeframe,
            buy_notional,
            tick,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin a periodic trading session.
    ///
    /// Validates the configured selection, flips the running flag and spawns
    /// the trigger loop, returning immediately. The first collaborator error
    /// is sent to `on_error` and terminates the session.
    pub async fn start(
        &self,
        writer: Arc<dyn Writer>,
        on_error: mpsc::Sender<Error>,
    ) -> Result<()> {
        let (symbols, strategies) = self.selection().await?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        info!(
            symbols = symbols.len(),
            strategies = strategies.len(),
            timeframe = %self.timeframe,
            "Trading session started"
        );

        let trader = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(trader.tick);
            interval.tick().await; // the first tick fires immediately

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match trader.run_once(&writer).await {
                            Ok(orders) => {
                                debug!(orders = orders.len(), "Trigger processed");
                            }
                            Err(e) => {
                                error!(error = %e, "Trigger failed — terminating session");
                                trader.running.store(false, Ordering::SeqCst);
                                let _ = on_error.send(e).await;
                                return;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        info!("Trading session stopped");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    /// Signal the session loop to exit before its next trigger. Exchange
    /// calls already in flight complete on their own.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::NotRunning);
        }

        if let Some(stop_tx) = self.stop_tx.lock().unwrap().take() {
            let _ = stop_tx.send(true);
        }
        Ok(())
    }

    /// One full trigger: fetch candles per selected symbol, evaluate every
    /// selected strategy against each series, and hand the complete batch to
    /// the writer in a single call.
    ///
    /// The first per-pair error aborts the remaining evaluations (dropping
    /// the join sets cancels their tasks) and is returned to the caller.
    pub async fn run_once(&self, writer: &Arc<dyn Writer>) -> Result<Vec<Order>> {
        let (symbols, strategies) = self.selection().await?;

        let mut symbol_tasks: JoinSet<Result<Vec<Order>>> = JoinSet::new();
        for symbol in symbols {
            let trader = self.clone();
            let strategies = strategies.clone();
            symbol_tasks.spawn(async move {
                let series = trader.exchange.get_candles(&symbol, &trader.timeframe).await?;

                let mut strategy_tasks: JoinSet<Result<Order>> = JoinSet::new();
                for strategy in strategies {
                    let trader = trader.clone();
                    let symbol = symbol.clone();
                    let series = series.clone();
                    strategy_tasks
                        .spawn(async move { trader.trade(&strategy, &symbol, &series).await });
                }

                let mut orders = Vec::with_capacity(strategy_tasks.len());
                while let Some(joined) = strategy_tasks.join_next().await {
                    orders.push(
                        joined.map_err(|e| Error::Other(format!("evaluation task failed: {e}")))??,
                    );
                }
                Ok(orders)
            });
        }

        let mut batch = Vec::new();
        while let Some(joined) = symbol_tasks.join_next().await {
            let orders = joined.map_err(|e| Error::Other(format!("symbol task failed: {e}")))??;
            batch.extend(orders);
        }

        // Task completion order is arbitrary; keep the batch stable.
        batch.sort_by(|a, b| a.pair().cmp(&b.pair()));

        writer.write(&batch)?;
        Ok(batch)
    }

    /// Evaluate one (strategy, symbol) pair and act on the decision.
    ///
    /// A no-op outcome (Hold, sell while flat, buy while long) still returns
    /// an order value, but it is never persisted and never reaches the
    /// exchange.
    pub async fn trade(&self, strategy: &str, symbol: &str, series: &[Candle]) -> Result<Order> {
        let handler = self
            .registry
            .get(strategy)
            .ok_or_else(|| Error::UnknownStrategy(strategy.to_string()))?;

        let (decision, diagnostics) = handler.evaluate(series);
        let order = Order::no_op(strategy, symbol, decision, diagnostics, &self.timeframe);

        if decision == Decision::Hold {
            return Ok(order);
        }

        let last = self.storage.get_last_order(strategy, symbol).await?;
        let position_open = matches!(&last, Some(o) if o.decision == Decision::Buy);

        match decision {
            Decision::Buy if position_open => {
                debug!(strategy, symbol, "Already long — skipping buy");
                return Ok(order);
            }
            Decision::Sell if !position_open => {
                debug!(strategy, symbol, "No open position — skipping sell");
                return Ok(order);
            }
            _ => {}
        }

        let close = series
            .last()
            .map(|c| c.close)
            .ok_or_else(|| Error::Other("empty candle series".to_string()))?;
        if close <= Decimal::ZERO {
            return Err(Error::Other(format!(
                "non-positive close price for {symbol}: {close}"
            )));
        }

        let quantity = match decision {
            Decision::Buy => self.buy_notional / close,
            // Sell the full position established by the last buy.
            Decision::Sell => last.map(|o| o.quantity).unwrap_or_default(),
            Decision::Hold => unreachable!(),
        };
        let notional = close * quantity;

        self.exchange
            .create_order(symbol, quantity, close, decision)
            .await?;

        let order = order.filled(quantity, notional);
        self.storage.store_order(&order).await?;
        info!(
            strategy,
            symbol,
            decision = %decision,
            quantity = %quantity,
            notional = %notional,
            "Order submitted"
        );
        Ok(order)
    }

    async fn selection(&self) -> Result<(Vec<String>, Vec<String>)> {
        let strategies = self
            .storage
            .get_setting(SELECTED_STRATEGIES)
            .await?
            .values();
        if strategies.is_empty() {
            return Err(Error::NoStrategiesSelected);
        }
        for name in &strategies {
            if !self.registry.contains(name) {
                return Err(Error::UnknownStrategy(name.clone()));
            }
        }

        let symbols = self.storage.get_setting(SELECTED_SYMBOLS).await?.values();
        if symbols.is_empty() {
            return Err(Error::NoSymbolsSelected);
        }

        Ok((symbols, strategies))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use common::{Balance, OrderAck};
    use output::StubWriter;
    use storage::MemoryStorage;
    use strategy::SmaTrendStrategy;

    use super::*;

    struct MockExchange {
        candles: Mutex<Vec<Candle>>,
        submitted: Mutex<Vec<(String, Decimal, Decimal, Decision)>>,
        fail_candles: bool,
        fail_orders: bool,
    }

    impl MockExchange {
        fn new(candles: Vec<Candle>) -> Self {
            Self {
                candles: Mutex::new(candles),
                submitted: Mutex::new(Vec::new()),
                fail_candles: false,
                fail_orders: false,
            }
        }

        fn submissions(&self) -> Vec<(String, Decimal, Decimal, Decision)> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        async fn get_candles(&self, _symbol: &str, _timeframe: &str) -> Result<Vec<Candle>> {
            if self.fail_candles {
                return Err(Error::Exchange("candle fetch failed".to_string()));
            }
            Ok(self.candles.lock().unwrap().clone())
        }

        async fn create_order(
            &self,
            symbol: &str,
            quantity: Decimal,
            price: Decimal,
            side: Decision,
        ) -> Result<OrderAck> {
            if self.fail_orders {
                return Err(Error::Exchange("order rejected".to_string()));
            }
            self.submitted
                .lock()
                .unwrap()
                .push((symbol.to_string(), quantity, price, side));
            Ok(OrderAck {
                symbol: symbol.to_string(),
                order_id: 1,
                client_order_id: "test".to_string(),
                status: "FILLED".to_string(),
            })
        }

        async fn list_symbols(&self) -> Result<Vec<String>> {
            Ok(vec!["LTCBTC".to_string(), "ETHBTC".to_string()])
        }

        async fn get_balances(&self, _assets: &[String]) -> Result<Vec<Balance>> {
            Ok(Vec::new())
        }
    }

    struct CountingWriter {
        batches: Mutex<Vec<usize>>,
    }

    impl CountingWriter {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    impl Writer for CountingWriter {
        fn write(&self, orders: &[Order]) -> Result<()> {
            self.batches.lock().unwrap().push(orders.len());
            Ok(())
        }
    }

    fn candle(index: i64, close: Decimal) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(index * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(5),
            close_time: Utc.timestamp_opt(index * 60 + 59, 0).unwrap(),
        }
    }

    fn flat_series(len: usize, close: Decimal) -> Vec<Candle> {
        (0..len).map(|i| candle(i as i64, close)).collect()
    }

    async fn mock_trader(exchange: Arc<MockExchange>) -> (Trader, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage.migrate_all().await.unwrap();
        storage
            .update_setting(SELECTED_SYMBOLS, "LTCBTC")
            .await
            .unwrap();
        storage
            .update_setting(SELECTED_STRATEGIES, "sma_trend")
            .await
            .unwrap();

        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(SmaTrendStrategy::default()));

        let trader = Trader::new(exchange, storage.clone(), registry, "1m", dec!(50));
        (trader, storage)
    }

    #[tokio::test]
    async fn full_position_cycle() {
        let exchange = Arc::new(MockExchange::new(Vec::new()));
        let (trader, storage) = mock_trader(exchange.clone()).await;
        let mut series = flat_series(50, dec!(5));

        // Rising close: buy 50 quote units at close 10 -> quantity 5.
        series.push(candle(51, dec!(10)));
        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Buy);
        assert!(order.successful);
        assert_eq!(order.quantity, dec!(5));
        assert_eq!(order.price, dec!(50));
        assert_eq!(
            order.diagnostics.get("SMA1").map(String::as_str),
            Some("5.5")
        );

        // Still rising but already long: no-op.
        series.push(candle(52, dec!(10)));
        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Buy);
        assert!(!order.successful);
        assert_eq!(order.quantity, Decimal::ZERO);

        // Strategy holds: no-op.
        series.push(candle(53, dec!(5)));
        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Hold);
        assert!(!order.successful);

        // Falling close: sell the full position of 5.
        series.push(candle(54, dec!(1)));
        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Sell);
        assert!(order.successful);
        assert_eq!(order.quantity, dec!(5));
        assert_eq!(order.price, dec!(5));

        // Only the two actionable orders were persisted or submitted.
        assert_eq!(storage.get_all_orders().await.unwrap().len(), 2);
        assert_eq!(exchange.submissions().len(), 2);
    }

    #[tokio::test]
    async fn sell_while_flat_is_an_unpersisted_no_op() {
        let exchange = Arc::new(MockExchange::new(Vec::new()));
        let (trader, storage) = mock_trader(exchange.clone()).await;

        let mut series = flat_series(50, dec!(10));
        series.push(candle(51, dec!(1)));

        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Sell);
        assert!(!order.successful);
        assert_eq!(order.quantity, Decimal::ZERO);
        assert!(storage.get_all_orders().await.unwrap().is_empty());
        assert!(exchange.submissions().is_empty());
    }

    #[tokio::test]
    async fn hold_never_reaches_exchange_or_storage() {
        let mut exchange = MockExchange::new(Vec::new());
        exchange.fail_orders = true; // any exchange call would fail the test
        let (trader, storage) = mock_trader(Arc::new(exchange)).await;

        let series = flat_series(50, dec!(5));
        let order = trader.trade("sma_trend", "LTCBTC", &series).await.unwrap();
        assert_eq!(order.decision, Decision::Hold);
        assert!(!order.successful);
        assert!(storage.get_all_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let exchange = Arc::new(MockExchange::new(Vec::new()));
        let (trader, _) = mock_trader(exchange).await;

        let result = trader.trade("nope", "LTCBTC", &flat_series(50, dec!(5))).await;
        assert!(matches!(result, Err(Error::UnknownStrategy(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn run_once_writes_one_complete_batch() {
        let mut series = flat_series(50, dec!(5));
        series.push(candle(51, dec!(10)));
        let exchange = Arc::new(MockExchange::new(series));
        let (trader, storage) = mock_trader(exchange).await;
        storage
            .update_setting(SELECTED_SYMBOLS, "LTCBTC,ETHBTC")
            .await
            .unwrap();
        storage
            .update_setting(SELECTED_STRATEGIES, "sma_trend,rsi")
            .await
            .unwrap();

        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(SmaTrendStrategy::default()));
        registry.register(Arc::new(strategy::RsiStrategy::default()));
        let trader = Trader::new(
            trader.exchange.clone(),
            storage.clone(),
            registry,
            "1m",
            dec!(50),
        );

        let writer = Arc::new(CountingWriter::new());
        let writer_dyn: Arc<dyn Writer> = writer.clone();
        let batch = trader.run_once(&writer_dyn).await.unwrap();

        // 2 symbols x 2 strategies, one writer call with the full batch.
        assert_eq!(batch.len(), 4);
        assert_eq!(*writer.batches.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn run_once_fails_fast_on_exchange_error() {
        let mut exchange = MockExchange::new(flat_series(50, dec!(5)));
        exchange.fail_candles = true;
        let (trader, _) = mock_trader(Arc::new(exchange)).await;

        let writer: Arc<dyn Writer> = Arc::new(StubWriter);
        let result = trader.run_once(&writer).await;
        assert!(matches!(result, Err(Error::Exchange(_))));
    }

    #[tokio::test]
    async fn start_rejects_empty_selection() {
        let exchange = Arc::new(MockExchange::new(Vec::new()));
        let (trader, storage) = mock_trader(exchange).await;
        let (error_tx, _error_rx) = mpsc::channel(1);
        let writer: Arc<dyn Writer> = Arc::new(StubWriter);

        storage.update_setting(SELECTED_STRATEGIES, "").await.unwrap();
        let result = trader.start(writer.clone(), error_tx.clone()).await;
        assert!(matches!(result, Err(Error::NoStrategiesSelected)));

        storage
            .update_setting(SELECTED_STRATEGIES, "sma_trend")
            .await
            .unwrap();
        storage.update_setting(SELECTED_SYMBOLS, "").await.unwrap();
        let result = trader.start(writer, error_tx).await;
        assert!(matches!(result, Err(Error::NoSymbolsSelected)));
        assert!(!trader.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_and_stop_twice() {
        let mut series = flat_series(50, dec!(5));
        series.push(candle(51, dec!(10)));
        let exchange = Arc::new(MockExchange::new(series));
        let (trader, _) = mock_trader(exchange).await;
        let (error_tx, _error_rx) = mpsc::channel(4);
        let writer: Arc<dyn Writer> = Arc::new(StubWriter);

        assert!(matches!(trader.stop(), Err(Error::NotRunning)));

        trader.start(writer.clone(), error_tx.clone()).await.unwrap();
        assert!(trader.is_running());
        let result = trader.start(writer, error_tx).await;
        assert!(matches!(result, Err(Error::AlreadyRunning)));

        trader.stop().unwrap();
        assert!(!trader.is_running());
        assert!(matches!(trader.stop(), Err(Error::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn session_terminates_on_first_error() {
        let mut exchange = MockExchange::new(flat_series(50, dec!(5)));
        exchange.fail_candles = true;
        let (trader, _) = mock_trader(Arc::new(exchange)).await;
        let (error_tx, mut error_rx) = mpsc::channel(1);
        let writer: Arc<dyn Writer> = Arc::new(StubWriter);

        trader.start(writer, error_tx).await.unwrap();

        let err = error_rx.recv().await.expect("session error expected");
        assert!(matches!(err, Error::Exchange(_)));
        assert!(!trader.is_running());
    }
}
