// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Evaluation environment shared by the iterators of one engine

use crate::cache::CursorCaches;
use crate::compare::{default_comparator, Comparator};
use crate::config::EngineConfig;
use crate::store::IndexStore;
use std::fmt;
use std::sync::Arc;

/// Services injected into iterator construction and cursor thawing
#[derive(Clone)]
pub struct EvalEnv {
    /// Index lookups and primitive reads
    pub store: Arc<dyn IndexStore>,
    /// Collation used for words, globs and text sort keys
    pub comparator: Arc<dyn Comparator>,
    /// Ticket caches keeping cursors short
    pub caches: CursorCaches,
    pub config: EngineConfig,
}

impl EvalEnv {
    /// Create an environment with caches sized by `config`
    pub fn new(store: Arc<dyn IndexStore>, config: EngineConfig) -> Self {
        Self {
            store,
            comparator: default_comparator(),
            caches: CursorCaches::from_config(&config.ticket_cache),
            config,
        }
    }

    /// Share caches with another environment (e.g. one per request)
    pub fn with_caches(mut self, caches: CursorCaches) -> Self {
        self.caches = caches;
        self
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }
}

impl fmt::Debug for EvalEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalEnv")
            .field("id_limit", &self.store.id_limit())
            .field("comparator", &self.comparator.name())
            .field("caches", &self.caches)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TicketCacheConfig;
    use crate::store::MemoryStore;

    #[test]
    fn test_caches_follow_config() {
        let store: Arc<dyn IndexStore> = Arc::new(MemoryStore::default());
        let env = EvalEnv::new(store.clone(), EngineConfig::default());
        assert!(env.caches.state.is_some());
        assert_eq!(env.comparator.name(), "default");

        let config = EngineConfig {
            ticket_cache: TicketCacheConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let env = EvalEnv::new(store, config);
        assert!(env.caches.state.is_none() && env.caches.sets.is_none());
    }
}
