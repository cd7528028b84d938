use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Well-known setting names consulted by the core.
pub const SELECTED_SYMBOLS: &str = "selected_symbols";
pub const SELECTED_STRATEGIES: &str = "selected_strategies";
pub const AVAILABLE_STRATEGIES: &str = "available_strategies";

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Buy => write!(f, "BUY"),
            Decision::Sell => write!(f, "SELL"),
            Decision::Hold => write!(f, "HOLD"),
        }
    }
}

/// One OHLCV candle as served by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// One attempted trading action for a (strategy, symbol) pair.
///
/// Constructed on every evaluation, but persisted only when a trade was
/// actually submitted to the exchange and accepted. A no-op (gated or Hold)
/// order always carries `successful == false` and zero quantity/price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub strategy: String,
    pub symbol: String,
    pub decision: Decision,
    /// Base-asset quantity. Zero for no-ops.
    pub quantity: Decimal,
    /// Quote-currency notional of the trade. Zero for no-ops.
    pub price: Decimal,
    /// Indicator snapshot at decision time.
    pub diagnostics: BTreeMap<String, String>,
    pub timeframe: String,
    pub successful: bool,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// A freshly evaluated, not (yet) actionable order.
    pub fn no_op(
        strategy: impl Into<String>,
        symbol: impl Into<String>,
        decision: Decision,
        diagnostics: BTreeMap<String, String>,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            symbol: symbol.into(),
            decision,
            quantity: Decimal::ZERO,
            price: Decimal::ZERO,
            diagnostics,
            timeframe: timeframe.into(),
            successful: false,
            created_at: Utc::now(),
        }
    }

    /// Mark the order as submitted and accepted by the exchange.
    pub fn filled(mut self, quantity: Decimal, notional: Decimal) -> Self {
        self.quantity = quantity;
        self.price = notional;
        self.successful = true;
        self
    }

    pub fn pair(&self) -> PairKey {
        PairKey {
            strategy: self.strategy.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

/// Acknowledgement returned by the exchange for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
}

/// A single asset balance on the exchange account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Named string setting. Multi-valued settings are comma-joined; the list
/// form is derived on read and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The comma-split list form. An empty value yields an empty list.
    pub fn values(&self) -> Vec<String> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Identifies one (strategy, symbol) pair. Ordered so that aggregates keyed
/// by it iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub strategy: String,
    pub symbol: String,
}

impl PairKey {
    pub fn new(strategy: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.strategy, self.symbol)
    }
}

/// Profitability aggregate over all orders for one pair within a window.
/// Write-once; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub strategy: String,
    pub symbol: String,
    pub buys: u32,
    pub sells: u32,
    pub successful_sells: u32,
    /// Quote-currency profit: sum of sell notionals minus buy notionals.
    pub profit: Decimal,
    /// Percentage of sells above their preceding buy price.
    pub success_rate: f64,
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Duration of one candle for the supported timeframes.
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let secs = match timeframe {
        "1m" => 60,
        "3m" => 3 * 60,
        "5m" => 5 * 60,
        "15m" => 15 * 60,
        "30m" => 30 * 60,
        "1h" => 60 * 60,
        "4h" => 4 * 60 * 60,
        "1d" => 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}
