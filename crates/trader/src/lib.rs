pub mod coordinator;

pub use coordinator::Trader;
