//! Ordered set of strategies and the selection rule between them

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::StrategiesConfig;
use crate::detection::error::DetectionError;
use crate::detection::strategies::{FALLBACK_STRATEGY, builtin_strategies};
use crate::detection::strategy::{StatsSnapshot, Strategy};
use crate::detection::types::SoftwareRequest;

/// Registered strategy as listed by [`StrategyRegistry::describe`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub supported_software: Vec<String>,
    pub stats: StatsSnapshot,
}

#[derive(Default)]
pub struct StrategyRegistry {
    strategies: IndexMap<String, Arc<dyn Strategy>>,
    priority_overrides: IndexMap<String, i32>,
}

impl StrategyRegistry {
    /// Empty registry; mostly useful for tests
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in strategies, with configured priority overrides
    pub fn with_builtins(config: &StrategiesConfig) -> Self {
        let mut registry = Self {
            strategies: IndexMap::new(),
            priority_overrides: config.priorities.clone(),
        };
        for strategy in builtin_strategies(config) {
            registry
                .strategies
                .insert(strategy.name().to_string(), strategy);
        }
        info!("Registered {} built-in strategies", registry.strategies.len());
        registry
    }

    /// Add a strategy ahead of the fallback.
    ///
    /// Re-registering an existing name replaces it in place.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name().to_string();

        if let Some(existing) = self.strategies.get_mut(&name) {
            warn!("Replacing already registered strategy: {}", name);
            *existing = strategy;
            return;
        }

        match self.strategies.get_index_of(FALLBACK_STRATEGY) {
            Some(index) => {
                self.strategies.shift_insert(index, name.clone(), strategy);
            }
            None => {
                self.strategies.insert(name.clone(), strategy);
            }
        }
        info!("Registered strategy: {}", name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    /// Strategy names in registration order
    pub fn names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    fn priority_of(&self, strategy: &dyn Strategy, request: &SoftwareRequest) -> i32 {
        self.priority_overrides
            .get(strategy.name())
            .copied()
            .unwrap_or_else(|| strategy.priority(request))
    }

    /// Pick the strategy for `request`.
    ///
    /// A hint naming a registered strategy that accepts the request wins.
    /// Otherwise the accepting strategy with the highest priority is chosen,
    /// the earliest registered among equals; the fallback is used when none
    /// accepts.
    pub fn select(&self, request: &SoftwareRequest) -> Result<Arc<dyn Strategy>, DetectionError> {
        if let Some(hint) = &request.strategy {
            match self.strategies.get(hint) {
                Some(strategy) if strategy.can_handle(request) => {
                    debug!("Using hinted strategy {} for {}", hint, request.name);
                    return Ok(Arc::clone(strategy));
                }
                Some(_) => debug!("Hinted strategy {} declined {}", hint, request.name),
                None => warn!("Unknown strategy hint {} for {}", hint, request.name),
            }
        }

        let mut best: Option<(i32, &Arc<dyn Strategy>)> = None;
        for strategy in self.strategies.values() {
            if !strategy.can_handle(request) {
                continue;
            }
            let priority = self.priority_of(strategy.as_ref(), request);
            if best.is_none_or(|(current, _)| priority > current) {
                best = Some((priority, strategy));
            }
        }

        if let Some((priority, strategy)) = best {
            debug!(
                "Selected strategy {} (priority {}) for {}",
                strategy.name(),
                priority,
                request.name
            );
            return Ok(Arc::clone(strategy));
        }

        self.strategies
            .get(FALLBACK_STRATEGY)
            .cloned()
            .ok_or_else(|| DetectionError::NoStrategy(request.name.clone()))
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.strategies
            .values()
            .map(|s| s.stats().snapshot())
            .collect()
    }

    pub fn describe(&self) -> Vec<StrategyInfo> {
        self.strategies
            .values()
            .map(|s| StrategyInfo {
                name: s.name().to_string(),
                supported_software: s.supported_software(),
                stats: s.stats().snapshot(),
            })
            .collect()
    }
}
