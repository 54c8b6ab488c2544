//! Catalogue of available strategies.
//!
//! Runners reference strategies by key; unknown keys are skipped by the
//! engine (never an error that stops the tick). Key resolution is
//! case-insensitive and tolerates the historical aliases.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::strategies::{
    BasicStrategy, BelowAboveStrategy, DonchianBreakoutStrategy, FibMomentumStrategy,
};
use crate::Strategy;

/// Shared, immutable strategy catalogue (safe to clone across workers).
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in strategies under their
    /// historical keys.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("basic", Arc::new(BasicStrategy));
        reg.register("below_above", Arc::new(BelowAboveStrategy));
        reg.register("chatgpt_5_strategy", Arc::new(DonchianBreakoutStrategy));
        reg.register("grok_4_strategy", Arc::new(FibMomentumStrategy));
        reg
    }

    pub fn register(&mut self, key: &str, strategy: Arc<dyn Strategy>) {
        self.entries.insert(key.to_lowercase(), strategy);
    }

    /// Normalize a runner's strategy key to a registered canonical key.
    pub fn resolve_key(&self, raw: &str) -> Option<String> {
        let key = raw.trim().to_lowercase();
        let canonical = match key.as_str() {
            "test" => "basic",
            // Historical label for the same breakout logic.
            "triple_top_break" => "chatgpt_5_strategy",
            other => other,
        };
        if self.entries.contains_key(canonical) {
            Some(canonical.to_string())
        } else {
            None
        }
    }

    pub fn get(&self, canonical_key: &str) -> Option<Arc<dyn Strategy>> {
        self.entries.get(canonical_key).cloned()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Strategy keys seeded by the runner bootstrap.
    pub fn bootstrap_keys(&self) -> Vec<&str> {
        self.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_by_canonical_key() {
        let reg = StrategyRegistry::with_builtins();
        assert_eq!(reg.resolve_key("below_above").as_deref(), Some("below_above"));
        assert_eq!(
            reg.resolve_key("CHATGPT_5_STRATEGY").as_deref(),
            Some("chatgpt_5_strategy")
        );
    }

    #[test]
    fn aliases_resolve() {
        let reg = StrategyRegistry::with_builtins();
        assert_eq!(reg.resolve_key("test").as_deref(), Some("basic"));
        assert_eq!(
            reg.resolve_key("triple_top_break").as_deref(),
            Some("chatgpt_5_strategy")
        );
    }

    #[test]
    fn unknown_key_resolves_to_none() {
        let reg = StrategyRegistry::with_builtins();
        assert_eq!(reg.resolve_key("fibonacci_yuval"), None);
        assert!(reg.get("fibonacci_yuval").is_none());
    }
}
