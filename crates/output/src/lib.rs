use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use common::{Order, Result};

/// Sink for the batch of orders produced by one coordinator trigger.
///
/// Called exactly once per trigger with the complete result set; an empty
/// batch is a no-op.
pub trait Writer: Send + Sync {
    fn write(&self, orders: &[Order]) -> Result<()>;
}

/// Known writer targets, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Text,
    Stub,
}

impl std::str::FromStr for Target {
    type Err = common::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Target::Text),
            "stub" => Ok(Target::Stub),
            other => Err(common::Error::Config(format!(
                "unknown output target '{other}'"
            ))),
        }
    }
}

pub fn create_writer(target: Target) -> Arc<dyn Writer> {
    match target {
        Target::Text => Arc::new(TextWriter::default()),
        Target::Stub => Arc::new(StubWriter),
    }
}

/// Appends each batch to a plain-text trade history file.
pub struct TextWriter {
    path: PathBuf,
}

impl TextWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for TextWriter {
    fn default() -> Self {
        Self::new("trade_history.txt")
    }
}

impl Writer for TextWriter {
    fn write(&self, orders: &[Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }

        let mut message = String::from("----------\n");
        for order in orders {
            let _ = writeln!(message, "Strategy: {}", order.strategy);
            let _ = writeln!(message, "Symbol: {}", order.symbol);
            let _ = writeln!(message, "Decision: {}", order.decision);
            let _ = writeln!(message, "Quantity: {}", order.quantity);
            let _ = writeln!(message, "Price: {}", order.price);
            for (key, value) in &order.diagnostics {
                let _ = writeln!(message, "{key}: {value}");
            }
            let _ = writeln!(
                message,
                "Time: {}",
                order.created_at.format("%d-%m-%Y %H:%M:%S")
            );
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(message.as_bytes())?;
        debug!(orders = orders.len(), path = %self.path.display(), "Trade batch logged");
        Ok(())
    }
}

/// Discards every batch. Used by backtests and tests.
pub struct StubWriter;

impl Writer for StubWriter {
    fn write(&self, _orders: &[Order]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal_macros::dec;

    use common::Decision;

    use super::*;

    fn sample_order() -> Order {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("SMA0".to_string(), "5".to_string());
        Order::no_op("sma_trend", "LTCBTC", Decision::Buy, diagnostics, "1m")
            .filled(dec!(5), dec!(50))
    }

    #[test]
    fn text_writer_appends_batches() {
        let path = std::env::temp_dir().join(format!("trade_history_{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let writer = TextWriter::new(&path);
        writer.write(&[sample_order()]).unwrap();
        writer.write(&[sample_order()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("----------").count(), 2);
        assert!(contents.contains("Strategy: sma_trend"));
        assert!(contents.contains("SMA0: 5"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn text_writer_ignores_empty_batches() {
        let path = std::env::temp_dir().join(format!("trade_history_empty_{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);

        TextWriter::new(&path).write(&[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn stub_writer_discards_everything() {
        StubWriter.write(&[sample_order()]).unwrap();
    }

    #[test]
    fn target_parsing() {
        assert_eq!("text".parse::<Target>().unwrap(), Target::Text);
        assert_eq!("stub".parse::<Target>().unwrap(), Target::Stub);
        assert!("excel".parse::<Target>().is_err());
    }
}
