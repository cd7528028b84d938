use rust_decimal::Decimal;

use crate::{Error, Result};

/// Whether orders are routed to the real exchange or acknowledged locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Live,
    Sim,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Sim => write!(f, "sim"),
        }
    }
}

/// All configuration loaded from environment variables at startup.
/// The core components never read the environment directly; the values are
/// handed to them once, here.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_mode: TradingMode,

    // Exchange credentials. Empty in sim mode.
    pub api_key: String,
    pub secret_key: String,

    /// SQLite connection string. In-memory storage is used when unset.
    pub database_url: Option<String>,

    // Trading
    pub timeframe: String,
    /// Fixed quote-currency budget spent on every buy.
    pub buy_notional: Decimal,

    /// Trade log target: "text" or "stub".
    pub output_target: String,

    /// Directory holding historical candle CSVs for backtests.
    pub backtest_data_dir: String,
}

impl Config {
    /// Load all configuration from environment variables, reading `.env`
    /// first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE").as_deref() {
            None | Some("sim") => TradingMode::Sim,
            Some("live") => TradingMode::Live,
            Some(other) => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'sim' or 'live', got '{other}'"
                )))
            }
        };

        let (api_key, secret_key) = match trading_mode {
            TradingMode::Live => (required_env("API_KEY")?, required_env("SECRET_KEY")?),
            TradingMode::Sim => (
                optional_env("API_KEY").unwrap_or_default(),
                optional_env("SECRET_KEY").unwrap_or_default(),
            ),
        };

        let timeframe = optional_env("TIMEFRAME").unwrap_or_else(|| "1m".to_string());
        if crate::timeframe_duration(&timeframe).is_none() {
            return Err(Error::Config(format!("unsupported TIMEFRAME '{timeframe}'")));
        }

        let buy_notional = match optional_env("BUY_NOTIONAL") {
            Some(v) => parse_buy_notional(&v)?,
            None => Decimal::from(50),
        };

        Ok(Config {
            trading_mode,
            api_key,
            secret_key,
            database_url: optional_env("DATABASE_URL"),
            timeframe,
            buy_notional,
            output_target: optional_env("OUTPUT_TARGET").unwrap_or_else(|| "text".to_string()),
            backtest_data_dir: optional_env("BACKTEST_DATA_DIR")
                .unwrap_or_else(|| "testdata".to_string()),
        })
    }
}

/// A zero or negative budget would let a buy fill with zero quantity, so
/// it is rejected at startup rather than at trade time.
fn parse_buy_notional(value: &str) -> Result<Decimal> {
    let notional = value
        .parse::<Decimal>()
        .map_err(|_| Error::Config(format!("BUY_NOTIONAL is not a decimal: '{value}'")))?;
    if notional <= Decimal::ZERO {
        return Err(Error::Config(format!(
            "BUY_NOTIONAL must be positive, got '{value}'"
        )));
    }
    Ok(notional)
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| Error::Config(format!("required environment variable '{key}' is not set")))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
