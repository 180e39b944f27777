// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory primitive store for testing and small datasets

use super::{Id, IndexStore, Linkage, Postings, Primitive, StoreError, StoreResult};
use crate::budget::{cost, ensure_budget, Budget, IterResult, Resume};
use crate::compare::{Comparator, DefaultComparator};
use crate::iter::idset::IdSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Prefixes of at least this many characters get a direct index key
    pub direct_prefix_len: usize,

    /// Maintain the combined (role, endpoint, type) index
    pub vip_index: bool,

    /// Posting lists longer than this are handed out lazily
    pub lazy_threshold: Option<usize>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            direct_prefix_len: 4,
            vip_index: false,
            lazy_threshold: None,
        }
    }
}

/// Serialized dataset accepted by [`MemoryStore::from_json`]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Dataset {
    #[serde(default)]
    pub config: MemoryStoreConfig,
    pub primitives: Vec<Primitive>,
}

#[derive(Default)]
struct StoreData {
    primitives: BTreeMap<Id, Primitive>,
    words: BTreeMap<String, BTreeSet<Id>>,
    linkages: HashMap<(Linkage, Id), BTreeSet<Id>>,
    vip: HashMap<(Linkage, Id, Id), BTreeSet<Id>>,
    id_limit: Id,
}

/// In-memory store with word, linkage and optional VIP indexes
pub struct MemoryStore {
    data: RwLock<StoreData>,
    config: MemoryStoreConfig,
    reads: AtomicU64,
}

impl MemoryStore {
    /// Create an empty memory store
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            config,
            reads: AtomicU64::new(0),
        }
    }

    pub fn from_primitives<I: IntoIterator<Item = Primitive>>(primitives: I) -> Self {
        Self::with_primitives(MemoryStoreConfig::default(), primitives)
    }

    pub fn with_primitives<I: IntoIterator<Item = Primitive>>(
        config: MemoryStoreConfig,
        primitives: I,
    ) -> Self {
        let store = Self::new(config);
        for primitive in primitives {
            store.insert(primitive);
        }
        store
    }

    /// Load a JSON [`Dataset`]
    pub fn from_json(text: &str) -> StoreResult<Self> {
        let dataset: Dataset = serde_json::from_str(text)
            .map_err(|e| StoreError::Unavailable(format!("invalid dataset: {}", e)))?;
        Ok(Self::with_primitives(dataset.config, dataset.primitives))
    }

    /// Insert or replace a primitive, reindexing it
    pub fn insert(&self, primitive: Primitive) {
        let mut data = self.data.write();
        if let Some(old) = data.primitives.remove(&primitive.id) {
            Self::unindex(&mut data, &old, self.config.vip_index);
        }

        data.id_limit = data.id_limit.max(primitive.id.saturating_add(1));
        if primitive.live {
            Self::index(&mut data, &primitive, self.config.vip_index);
        }
        data.primitives.insert(primitive.id, primitive);
    }

    pub fn len(&self) -> usize {
        self.data.read().primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().primitives.is_empty()
    }

    /// Number of primitive reads served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn words_of(primitive: &Primitive) -> BTreeSet<String> {
        let comparator = DefaultComparator;
        primitive
            .name
            .iter()
            .chain(primitive.value.iter())
            .flat_map(|text| comparator.words(text))
            .collect()
    }

    fn index(data: &mut StoreData, primitive: &Primitive, vip: bool) {
        for word in Self::words_of(primitive) {
            data.words.entry(word).or_default().insert(primitive.id);
        }
        for role in Linkage::ALL {
            if let Some(endpoint) = primitive.linkage(role) {
                data.linkages
                    .entry((role, endpoint))
                    .or_default()
                    .insert(primitive.id);
                if let (true, Some(type_id), false) =
                    (vip, primitive.type_id, role == Linkage::Type)
                {
                    data.vip
                        .entry((role, endpoint, type_id))
                        .or_default()
                        .insert(primitive.id);
                }
            }
        }
    }

    fn unindex(data: &mut StoreData, primitive: &Primitive, vip: bool) {
        for word in Self::words_of(primitive) {
            if let Some(ids) = data.words.get_mut(&word) {
                ids.remove(&primitive.id);
                if ids.is_empty() {
                    data.words.remove(&word);
                }
            }
        }
        for role in Linkage::ALL {
            if let Some(endpoint) = primitive.linkage(role) {
                if let Some(ids) = data.linkages.get_mut(&(role, endpoint)) {
                    ids.remove(&primitive.id);
                }
                if let (true, Some(type_id)) = (vip, primitive.type_id) {
                    if let Some(ids) = data.vip.get_mut(&(role, endpoint, type_id)) {
                        ids.remove(&primitive.id);
                    }
                }
            }
        }
    }

    fn postings<'a, I: Iterator<Item = &'a Id>>(&self, ids: I) -> Option<Postings> {
        let set = IdSet::from_sorted(ids.copied().collect());
        if set.is_empty() {
            return None;
        }

        let set = Arc::new(set);
        match self.config.lazy_threshold {
            Some(threshold) if set.len() > threshold => {
                log::trace!("Handing out deferred posting list of {} ids", set.len());
                Some(Postings::Deferred(Box::new(
                    move |budget: &mut Budget| -> IterResult<Arc<IdSet>> {
                        ensure_budget!(budget);
                        budget.charge(cost::RECOVER * set.len() as i64);
                        Ok(Resume::Done(set.clone()))
                    },
                )))
            }
            _ => Some(Postings::Resident(set)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl IndexStore for MemoryStore {
    fn id_limit(&self) -> Id {
        self.data.read().id_limit
    }

    fn direct_prefix_len(&self) -> usize {
        self.config.direct_prefix_len
    }

    fn word_postings(&self, key: &str) -> StoreResult<Option<Postings>> {
        let data = self.data.read();
        match key.strip_suffix('*') {
            Some(prefix) => {
                let merged: BTreeSet<Id> = data
                    .words
                    .range(prefix.to_string()..)
                    .take_while(|(word, _)| word.starts_with(prefix))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect();
                Ok(self.postings(merged.iter()))
            }
            None => Ok(data.words.get(key).and_then(|ids| self.postings(ids.iter()))),
        }
    }

    fn completions(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let data = self.data.read();
        Ok(data
            .words
            .range(prefix.to_string()..)
            .take_while(|(word, _)| word.starts_with(prefix))
            .map(|(word, _)| word.clone())
            .collect())
    }

    fn linkage_postings(&self, role: Linkage, endpoint: Id) -> StoreResult<Option<Postings>> {
        let data = self.data.read();
        Ok(data
            .linkages
            .get(&(role, endpoint))
            .and_then(|ids| self.postings(ids.iter())))
    }

    fn vip_postings(
        &self,
        role: Linkage,
        endpoint: Id,
        type_id: Id,
    ) -> StoreResult<Option<Postings>> {
        if !self.config.vip_index {
            return Ok(None);
        }
        let data = self.data.read();
        Ok(data
            .vip
            .get(&(role, endpoint, type_id))
            .and_then(|ids| self.postings(ids.iter())))
    }

    fn live_postings(&self) -> StoreResult<Option<Postings>> {
        let data = self.data.read();
        let live = data
            .primitives
            .values()
            .filter(|p| p.live)
            .map(|p| &p.id);
        Ok(self.postings(live))
    }

    fn read_primitive(&self, id: Id) -> StoreResult<Option<Primitive>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.read().primitives.get(&id).cloned())
    }
}
