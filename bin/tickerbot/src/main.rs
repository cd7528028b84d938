use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backtest::{BacktestEngine, BacktestRequest};
use common::{
    Config, Error, ExchangeClient, TradingMode, AVAILABLE_STRATEGIES, SELECTED_STRATEGIES,
    SELECTED_SYMBOLS,
};
use exchange::{BinanceClient, SimClient};
use output::{create_writer, Target};
use storage::{MemoryStorage, SqliteStorage, StorageClient};
use strategy::StrategyRegistry;
use trader::Trader;

#[derive(Parser)]
#[command(name = "tickerbot", about = "Unattended crypto trading agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a trading session and run until interrupted.
    Run,
    /// Replay recorded candles through the selected strategies.
    Backtest {
        /// First day of the recorded series, YYYY-MM-DD.
        #[arg(long)]
        start: NaiveDate,
        /// Last day of the recorded series, YYYY-MM-DD.
        #[arg(long)]
        end: NaiveDate,
    },
    /// Drop all stored orders, settings and analyses, then re-seed.
    Reset,
    /// Inspect or change stored settings.
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print every stored setting.
    List,
    /// Print one setting.
    Get { name: String },
    /// Replace a setting's value. Symbol and strategy selections are
    /// validated before they are stored.
    Set { name: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env().context("loading configuration")?;

    let storage: Arc<dyn StorageClient> = match &cfg.database_url {
        Some(url) => Arc::new(
            SqliteStorage::connect(url)
                .await
                .context("connecting to database")?,
        ),
        None => Arc::new(MemoryStorage::new()),
    };
    storage.migrate_all().await.context("preparing storage")?;

    let registry = StrategyRegistry::with_defaults();
    // The stored list always reflects the strategies this build actually has.
    storage
        .update_setting(AVAILABLE_STRATEGIES, &registry.names().join(","))
        .await?;

    match cli.command {
        Command::Run => run(&cfg, storage, registry).await,
        Command::Backtest { start, end } => backtest(&cfg, storage, registry, start, end).await,
        Command::Reset => reset(storage, &registry).await,
        Command::Settings { action } => settings(&cfg, storage, &registry, action).await,
    }
}

fn exchange_client(cfg: &Config) -> Arc<dyn ExchangeClient> {
    match cfg.trading_mode {
        TradingMode::Live => Arc::new(BinanceClient::new(&cfg.api_key, &cfg.secret_key)),
        TradingMode::Sim => Arc::new(SimClient::new()),
    }
}

async fn run(
    cfg: &Config,
    storage: Arc<dyn StorageClient>,
    registry: StrategyRegistry,
) -> anyhow::Result<()> {
    info!(mode = %cfg.trading_mode, timeframe = %cfg.timeframe, "Tickerbot starting");

    let writer = create_writer(cfg.output_target.parse::<Target>()?);
    let trader = Trader::new(
        exchange_client(cfg),
        storage,
        registry,
        cfg.timeframe.clone(),
        cfg.buy_notional,
    );

    let (err_tx, mut err_rx) = mpsc::channel::<Error>(1);
    trader.start(writer, err_tx).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            trader.stop()?;
        }
        err = err_rx.recv() => {
            if let Some(err) = err {
                bail!("trading session terminated: {err}");
            }
        }
    }
    Ok(())
}

async fn backtest(
    cfg: &Config,
    storage: Arc<dyn StorageClient>,
    registry: StrategyRegistry,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<()> {
    let symbols = storage.get_setting(SELECTED_SYMBOLS).await?.values();
    let strategies = storage.get_setting(SELECTED_STRATEGIES).await?.values();

    let request = BacktestRequest {
        symbols,
        strategies,
        timeframe: cfg.timeframe.clone(),
        start: start.and_hms_opt(0, 0, 0).unwrap().and_utc(),
        end: end.and_hms_opt(0, 0, 0).unwrap().and_utc(),
        data_dir: PathBuf::from(&cfg.backtest_data_dir),
        buy_notional: cfg.buy_notional,
    };

    let analyses = BacktestEngine::new(registry).run(&request).await?;
    if analyses.is_empty() {
        println!("No trades were produced.");
        return Ok(());
    }

    for (pair, a) in &analyses {
        println!("----------");
        println!("Pair: {pair}");
        println!("Buys: {}", a.buys);
        println!("Sells: {} ({} in profit)", a.sells, a.successful_sells);
        println!("Success rate: {:.2}%", a.success_rate);
        println!("Profit: {}", a.profit);
    }
    Ok(())
}

async fn reset(storage: Arc<dyn StorageClient>, registry: &StrategyRegistry) -> anyhow::Result<()> {
    storage.drop_all().await?;
    storage.migrate_all().await?;
    storage
        .update_setting(AVAILABLE_STRATEGIES, &registry.names().join(","))
        .await?;
    println!("Storage reset.");
    Ok(())
}

async fn settings(
    cfg: &Config,
    storage: Arc<dyn StorageClient>,
    registry: &StrategyRegistry,
    action: SettingsCommand,
) -> anyhow::Result<()> {
    match action {
        SettingsCommand::List => {
            let mut settings: Vec<_> = storage.get_all_settings().await?.into_values().collect();
            settings.sort_by(|a, b| a.name.cmp(&b.name));
            for setting in settings {
                println!("{}={}", setting.name, setting.value);
            }
        }
        SettingsCommand::Get { name } => {
            let setting = storage.get_setting(&name).await?;
            println!("{}={}", setting.name, setting.value);
        }
        SettingsCommand::Set { name, value } => {
            validate_setting(cfg, registry, &name, &value).await?;
            storage.update_setting(&name, &value).await?;
            println!("{name}={value}");
        }
    }
    Ok(())
}

/// Selections are checked before they are stored so a session never starts
/// with a strategy this build does not have or a symbol the exchange does
/// not list.
async fn validate_setting(
    cfg: &Config,
    registry: &StrategyRegistry,
    name: &str,
    value: &str,
) -> anyhow::Result<()> {
    match name {
        SELECTED_STRATEGIES => {
            for strategy in value.split(',').filter(|s| !s.is_empty()) {
                if !registry.contains(strategy) {
                    return Err(Error::UnknownStrategy(strategy.to_string()).into());
                }
            }
        }
        SELECTED_SYMBOLS => {
            let listed = exchange_client(cfg).list_symbols().await?;
            for symbol in value.split(',').filter(|s| !s.is_empty()) {
                if !listed.iter().any(|s| s == symbol) {
                    return Err(Error::UnknownSymbol(symbol.to_string()).into());
                }
            }
        }
        AVAILABLE_STRATEGIES => {
            bail!("'{AVAILABLE_STRATEGIES}' is maintained automatically and cannot be set");
        }
        _ => {}
    }
    Ok(())
}
