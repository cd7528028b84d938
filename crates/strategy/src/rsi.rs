use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;

use common::{Candle, Decision};

use crate::Strategy;

/// RSI mean-reversion strategy.
///
/// Uses Wilder's smoothed moving average (standard RSI). Buys when the
/// market is oversold, sells when it is overbought.
pub struct RsiStrategy {
    period: usize,
    overbought: f64,
    oversold: f64,
}

impl RsiStrategy {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            period,
            overbought,
            oversold,
        }
    }

    /// Compute RSI from close prices (oldest first). `None` until at least
    /// `period + 1` values are available.
    fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }

        // First average gain/loss over the initial `period` changes
        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
        let mut avg_loss = initial
            .iter()
            .filter(|&&c| c < 0.0)
            .map(|c| c.abs())
            .sum::<f64>()
            / self.period as f64;

        // Wilder smoothing over remaining changes
        for &change in &changes[self.period..] {
            let gain = if change > 0.0 { change } else { 0.0 };
            let loss = if change < 0.0 { change.abs() } else { 0.0 };
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::new(14, 70.0, 30.0)
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn min_candles(&self) -> usize {
        self.period + 1
    }

    fn evaluate(&self, series: &[Candle]) -> (Decision, BTreeMap<String, String>) {
        let closes: Vec<f64> = series
            .iter()
            .filter_map(|c| c.close.to_f64())
            .collect();

        let mut diagnostics = BTreeMap::new();
        let Some(rsi) = self.compute(&closes) else {
            return (Decision::Hold, diagnostics);
        };
        diagnostics.insert("RSI".to_string(), format!("{rsi:.2}"));

        let decision = if rsi <= self.oversold {
            Decision::Buy
        } else if rsi >= self.overbought {
            Decision::Sell
        } else {
            Decision::Hold
        };

        (decision, diagnostics)
    }
}
