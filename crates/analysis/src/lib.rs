use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use common::{Analysis, Decision, Order, PairKey};

/// Fold a chronological order history into per-pair profitability
/// statistics.
///
/// Only successful orders affect the counters; Hold and gated no-ops are
/// ignored. The result is keyed by an ordered pair key, so its contents and
/// iteration order depend only on the chronological order of the input.
pub fn aggregate(
    orders: &[Order],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BTreeMap<PairKey, Analysis> {
    let created_at = Utc::now();
    let mut analyses: BTreeMap<PairKey, Analysis> = BTreeMap::new();
    let mut last_buy_prices: BTreeMap<PairKey, Decimal> = BTreeMap::new();

    for order in orders {
        if !order.successful {
            continue;
        }

        let key = order.pair();
        let analysis = analyses.entry(key.clone()).or_insert_with(|| Analysis {
            strategy: order.strategy.clone(),
            symbol: order.symbol.clone(),
            buys: 0,
            sells: 0,
            successful_sells: 0,
            profit: Decimal::ZERO,
            success_rate: 0.0,
            timeframe: order.timeframe.clone(),
            start,
            end,
            created_at,
        });

        match order.decision {
            Decision::Buy => {
                analysis.buys += 1;
                analysis.profit -= order.price;
                last_buy_prices.insert(key, order.price);
            }
            Decision::Sell => {
                // A pair with no recorded buy inside the window has a zero
                // cost basis: a sell closing a position opened before the
                // window counts as successful at any positive price.
                let cost_basis = last_buy_prices.get(&key).copied().unwrap_or_default();
                if cost_basis < order.price {
                    analysis.successful_sells += 1;
                }
                analysis.sells += 1;
                analysis.profit += order.price;
                analysis.success_rate = if analysis.sells > 0 {
                    f64::from(analysis.successful_sells) / f64::from(analysis.sells) * 100.0
                } else {
                    0.0
                };
            }
            Decision::Hold => {}
        }
    }

    analyses
}
