use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use common::{Candle, Error, Result};

/// One row of a Binance kline export: open time and close time in epoch
/// milliseconds, prices and volumes as decimal strings.
#[derive(Debug, Deserialize)]
struct KlineRow(
    i64,    // open time (ms)
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time (ms)
    String, // quote asset volume
    i64,    // number of trades
    String, // taker buy base volume
    String, // taker buy quote volume
);

/// Conventional location of a downloaded candle series.
pub fn series_path(
    dir: &Path,
    symbol: &str,
    timeframe: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PathBuf {
    dir.join(format!(
        "{symbol}_{timeframe}_{}_{}.csv",
        start.format("%d-%m-%Y"),
        end.format("%d-%m-%Y"),
    ))
}

/// Load one contiguous candle series from a headerless kline CSV.
pub fn load_series(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let mut candles = Vec::new();
    for row in reader.deserialize::<KlineRow>() {
        let row = row?;
        candles.push(Candle {
            open_time: timestamp_from_ms(row.0)?,
            open: row.1.parse::<Decimal>()?,
            high: row.2.parse::<Decimal>()?,
            low: row.3.parse::<Decimal>()?,
            close: row.4.parse::<Decimal>()?,
            volume: row.5.parse::<Decimal>()?,
            close_time: timestamp_from_ms(row.6)?,
        });
    }

    info!(path = %path.display(), candles = candles.len(), "Loaded candle series");
    Ok(candles)
}

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Other(format!("bad timestamp in candle data: {ms}")))
}
