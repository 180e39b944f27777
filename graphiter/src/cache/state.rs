// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cursor-state specializations of the ticket cache
//!
//! Long cursor tails are replaced by `@<stamp>`. A tail that could not be
//! cached, or that itself begins with `@`, is written as `@x<literal>`.

use super::{ResourceCache, Stamp, Ticket};
use crate::config::TicketCacheConfig;
use crate::error::{CacheError, IterError};
use crate::iter::idset::IdSet;
use std::sync::Arc;

/// Cache of long cursor state strings
#[derive(Debug)]
pub struct StateCache {
    cache: ResourceCache<String>,
    inline_limit: usize,
}

impl StateCache {
    pub fn new(ceiling: usize, inline_limit: usize) -> Self {
        Self {
            cache: ResourceCache::new("state", ceiling),
            inline_limit,
        }
    }

    pub fn cache(&self) -> &ResourceCache<String> {
        &self.cache
    }

    /// Replace a long tail by a stamp reference
    pub fn encode(&self, tail: String) -> String {
        encode_state(tail, Some(self))
    }

    pub fn decode(&self, text: &str) -> Result<String, IterError> {
        decode_state(text, Some(self))
    }
}

/// Encode a cursor tail, stamping it when a cache is available and the
/// tail is long
pub fn encode_state(tail: String, cache: Option<&StateCache>) -> String {
    if let Some(cache) = cache {
        if tail.len() > cache.inline_limit {
            if let Ticket::Stamp(stamp) = cache.cache.store(tail.clone()) {
                return format!("@{}", stamp);
            }
        }
    }
    if tail.starts_with('@') {
        format!("@x{}", tail)
    } else {
        tail
    }
}

pub fn decode_state(text: &str, cache: Option<&StateCache>) -> Result<String, IterError> {
    if let Some(literal) = text.strip_prefix("@x") {
        return Ok(literal.to_string());
    }
    match text.strip_prefix('@') {
        Some(stamp_text) => {
            let stamp = Stamp::parse(stamp_text)
                .ok_or_else(|| IterError::cursor(format!("bad stamp '{}'", stamp_text)))?;
            let cache = cache.ok_or(CacheError::Unavailable("state"))?;
            Ok(cache.cache.thaw(&stamp)?.as_ref().clone())
        }
        None => Ok(text.to_string()),
    }
}

/// Cache of id sets referenced from frozen IDSet cursors
pub type IdSetCache = ResourceCache<IdSet>;

/// The caches cursor freezing and thawing may use
#[derive(Debug, Clone)]
pub struct CursorCaches {
    pub state: Option<Arc<StateCache>>,
    pub sets: Option<Arc<IdSetCache>>,
    /// Sets with at most this many members are always inlined
    pub set_inline_limit: usize,
}

impl CursorCaches {
    /// No caches: every cursor is self-contained
    pub fn none() -> Self {
        Self {
            state: None,
            sets: None,
            set_inline_limit: usize::MAX,
        }
    }

    pub fn from_config(config: &TicketCacheConfig) -> Self {
        if !config.enabled {
            return Self::none();
        }
        Self {
            state: Some(Arc::new(StateCache::new(
                config.state_ceiling_bytes,
                config.state_inline_limit,
            ))),
            sets: Some(Arc::new(ResourceCache::new("idset", config.set_ceiling_bytes))),
            set_inline_limit: config.set_inline_limit,
        }
    }

    pub fn encode_state(&self, tail: String) -> String {
        encode_state(tail, self.state.as_deref())
    }

    pub fn decode_state(&self, text: &str) -> Result<String, IterError> {
        decode_state(text, self.state.as_deref())
    }
}

impl Default for CursorCaches {
    fn default() -> Self {
        Self::from_config(&TicketCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_tails_stay_inline() {
        let cache = StateCache::new(1024, 16);
        assert_eq!(cache.encode("st:3:1:2".to_string()), "st:3:1:2");
        assert_eq!(cache.decode("st:3:1:2").unwrap(), "st:3:1:2");
    }

    #[test]
    fn test_long_tails_are_stamped() {
        let cache = StateCache::new(1024, 16);
        let tail = "idset:0-100:1,2,3,4,5,6,7,8,9/5/st:9:1:2".to_string();
        let encoded = cache.encode(tail.clone());
        assert!(encoded.starts_with('@'));
        assert!(encoded.len() < tail.len());
        assert_eq!(cache.decode(&encoded).unwrap(), tail);

        // Same content, same stamp
        assert_eq!(cache.encode(tail), encoded);
    }

    #[test]
    fn test_at_sign_tails_are_quoted() {
        let cache = StateCache::new(1024, 16);
        let encoded = cache.encode("@abc".to_string());
        assert_eq!(encoded, "@x@abc");
        assert_eq!(cache.decode(&encoded).unwrap(), "@abc");

        assert_eq!(encode_state("@q".to_string(), None), "@x@q");
    }

    #[test]
    fn test_rejected_tails_are_inlined() {
        let cache = StateCache::new(20, 4);
        let tail = "x".repeat(15);
        assert_eq!(cache.encode(tail.clone()), tail);

        let tail = format!("@{}", "y".repeat(15));
        assert_eq!(cache.encode(tail.clone()), format!("@x{}", tail));
    }

    #[test]
    fn test_many_stamped_tails_round_trip() {
        let cache = StateCache::new(1 << 30, 4);
        for i in 0..2200 {
            let tail = format!("st:{}:1:2", i);
            let encoded = cache.encode(tail.clone());
            assert!(!encoded.starts_with("@x"), "tail #{} encoded as {}", i, encoded);
            assert_eq!(cache.decode(&encoded).unwrap(), tail, "tail #{}", i);
        }
    }

    #[test]
    fn test_decode_failures() {
        let cache = StateCache::new(1024, 16);
        let err = cache.decode("@nosuch").unwrap_err();
        assert!(err.is_semantic());

        let err = decode_state("@abc", None).unwrap_err();
        assert!(matches!(err, IterError::Cache(CacheError::Unavailable("state"))));
        assert!(cache.decode("@a-b").is_err());
    }

    #[test]
    fn test_disabled_caches() {
        let config = TicketCacheConfig {
            enabled: false,
            ..TicketCacheConfig::default()
        };
        let caches = CursorCaches::from_config(&config);
        assert!(caches.state.is_none());
        let long = "s".repeat(500);
        assert_eq!(caches.encode_state(long.clone()), long);
    }
}
