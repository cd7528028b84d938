use std::collections::BTreeMap;

use rust_decimal::Decimal;

use common::{Candle, Decision};

use crate::Strategy;

/// Simple moving-average trend follower.
///
/// Buys when the last close sits above a rising SMA, sells when it sits
/// below a falling one, by comparing the SMA two candles back with the
/// current one.
pub struct SmaTrendStrategy {
    period: usize,
}

impl SmaTrendStrategy {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "SMA period must be >= 2");
        Self { period }
    }
}

impl Default for SmaTrendStrategy {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Strategy for SmaTrendStrategy {
    fn name(&self) -> &str {
        "sma_trend"
    }

    fn min_candles(&self) -> usize {
        self.period + 3
    }

    fn evaluate(&self, series: &[Candle]) -> (Decision, BTreeMap<String, String>) {
        let mut diagnostics = BTreeMap::new();
        if series.len() < self.min_candles() {
            return (Decision::Hold, diagnostics);
        }

        let closes: Vec<Decimal> = series.iter().map(|c| c.close).collect();
        let last = series.len() - 1;
        let earlier = sma_at(&closes, last - 2, self.period);
        let current = sma_at(&closes, last, self.period);
        let close = closes[last];

        diagnostics.insert("SMA0".to_string(), earlier.normalize().to_string());
        diagnostics.insert("SMA1".to_string(), current.normalize().to_string());

        let decision = if close > current && current > earlier {
            Decision::Buy
        } else if close < current && current < earlier {
            Decision::Sell
        } else {
            Decision::Hold
        };

        (decision, diagnostics)
    }
}

/// SMA of the window of `period` closes ending at `idx`, shrinking the
/// window at the start of the series.
fn sma_at(closes: &[Decimal], idx: usize, period: usize) -> Decimal {
    let start = (idx + 1).saturating_sub(period);
    let window = &closes[start..=idx];
    let sum: Decimal = window.iter().sum();
    sum / Decimal::from(window.len() as u64)
}
