// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Engine configuration

use serde::{Deserialize, Serialize};

/// Top-level evaluation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticket caches backing short cursors
    pub ticket_cache: TicketCacheConfig,

    /// Prefix iterator tuning
    pub prefix: PrefixConfig,

    /// VIP iterator tuning
    pub vip: VipConfig,

    /// Incremental sort limits
    pub sort: SortConfig,

    /// Per-request scheduling
    pub query: QueryConfig,
}

/// Configuration of the state and id-set ticket caches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketCacheConfig {
    /// Disable to always inline cursor state
    pub enabled: bool,

    /// Memory ceiling of the state cache (bytes)
    pub state_ceiling_bytes: usize,

    /// Memory ceiling of the id-set cache (bytes)
    pub set_ceiling_bytes: usize,

    /// State tails at most this long stay inline in the cursor
    pub state_inline_limit: usize,

    /// Id sets with at most this many members stay inline in the cursor
    pub set_inline_limit: usize,
}

impl Default for TicketCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_ceiling_bytes: 1024 * 1024 * 4, // 4MB
            set_ceiling_bytes: 1024 * 1024 * 16,  // 16MB
            state_inline_limit: 64,
            set_inline_limit: 16,
        }
    }
}

/// Prefix iterator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixConfig {
    /// Number of leading results shared between an original and its clones
    pub cache_size: usize,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self { cache_size: 64 }
    }
}

/// VIP iterator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VipConfig {
    /// Largest intersection materialized eagerly during construction
    pub merge_cap: usize,
}

impl Default for VipConfig {
    fn default() -> Self {
        Self { merge_cap: 32 }
    }
}

/// Incremental sort configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Upper bound on start + page size
    pub max_window: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self { max_window: 100_000 }
    }
}

/// Request scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Cost allowance of one scheduler turn
    pub turn_budget: i64,

    /// Turns a request may take before it is abandoned
    pub max_turns: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            turn_budget: 10_000,
            max_turns: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create configuration for memory-constrained environments
    pub fn memory_constrained() -> Self {
        let mut config = Self::default();
        config.ticket_cache.state_ceiling_bytes = 1024 * 256; // 256KB
        config.ticket_cache.set_ceiling_bytes = 1024 * 1024; // 1MB
        config.prefix.cache_size = 16;
        config.vip.merge_cap = 8;
        config.sort.max_window = 10_000;
        config
    }

    /// Create configuration for long scans over large posting lists
    pub fn deep_scan() -> Self {
        Self {
            prefix: PrefixConfig { cache_size: 256 },
            vip: VipConfig { merge_cap: 128 },
            query: QueryConfig {
                turn_budget: 100_000,
                ..QueryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| format!("Invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let tickets = &self.ticket_cache;
        if tickets.enabled {
            if tickets.state_inline_limit * 2 > tickets.state_ceiling_bytes {
                return Err(format!(
                    "State inline limit ({} bytes) must not exceed half the state cache ceiling ({} bytes)",
                    tickets.state_inline_limit, tickets.state_ceiling_bytes
                ));
            }
            if tickets.set_ceiling_bytes == 0 {
                return Err("Id-set cache ceiling must be > 0".to_string());
            }
        }

        if self.prefix.cache_size == 0 {
            return Err("Prefix cache size must be > 0".to_string());
        }

        if self.sort.max_window == 0 {
            return Err("Sort window must be > 0".to_string());
        }

        if self.query.turn_budget <= 0 {
            return Err(format!(
                "Turn budget must be positive, got {}",
                self.query.turn_budget
            ));
        }

        if self.query.max_turns == 0 {
            return Err("Query must be allowed at least one turn".to_string());
        }

        Ok(())
    }
}
