pub mod binance;
pub mod sim;

pub use binance::BinanceClient;
pub use sim::SimClient;
