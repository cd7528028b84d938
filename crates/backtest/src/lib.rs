pub mod engine;
pub mod feed;
pub mod loader;

pub use engine::{BacktestEngine, BacktestRequest};
pub use feed::{ReplayClient, ReplayFeed};
