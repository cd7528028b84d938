use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::{RsiStrategy, SmaTrendStrategy, Strategy};

/// Explicit name → strategy lookup, constructed once at startup and handed
/// to the coordinator. There is no ambient global registration.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SmaTrendStrategy::default()));
        registry.register(Arc::new(RsiStrategy::default()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        info!(name = %strategy.name(), "Registered strategy");
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_both_builtin_strategies() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["rsi", "sma_trend"]);
        assert!(registry.get("sma_trend").is_some());
        assert!(registry.get("nope").is_none());
    }
}
