pub mod registry;
pub mod rsi;
pub mod sma_trend;

pub use registry::StrategyRegistry;
pub use rsi::RsiStrategy;
pub use sma_trend::SmaTrendStrategy;

use std::collections::BTreeMap;

use common::{Candle, Decision};

/// A trading strategy: a pure function from a candle series to a decision
/// plus a snapshot of the indicator values that produced it.
///
/// Implementations must be stateless and deterministic given the series;
/// the same input always yields the same output, which is what makes
/// backtest replay reproducible.
pub trait Strategy: Send + Sync {
    /// Registry name of this strategy.
    fn name(&self) -> &str;

    /// Minimum candle count required to produce a meaningful decision.
    fn min_candles(&self) -> usize;

    /// Evaluate the series (oldest candle first).
    fn evaluate(&self, series: &[Candle]) -> (Decision, BTreeMap<String, String>);
}
