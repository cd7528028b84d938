use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // State errors — rejected synchronously by the coordinator.
    #[error("trading session is already running")]
    AlreadyRunning,

    #[error("no trading session is running")]
    NotRunning,

    // Configuration errors — rejected before a session starts.
    #[error("no selected strategies found")]
    NoStrategiesSelected,

    #[error("no selected symbols found")]
    NoSymbolsSelected,

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("expected the end date to be later than the start date")]
    WrongDateOrder,

    // Collaborator errors.
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
