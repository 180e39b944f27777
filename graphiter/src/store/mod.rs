// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Primitive store abstraction
//!
//! Iterators never touch storage directly; they go through [`IndexStore`],
//! which exposes the handful of index lookups evaluation needs: word and
//! prefix postings, linkage postings, the optional VIP index, and primitive
//! reads for per-id checks.

pub mod memory;

use crate::iter::idset::{IdSet, Recover};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{MemoryStore, MemoryStoreConfig};

/// Local primitive id
pub type Id = u64;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Primitive not found: {0}")]
    NotFound(Id),

    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: Id, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Role of a linkage from a primitive to another primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Left,
    Right,
    Scope,
    Type,
}

impl Linkage {
    pub const ALL: [Linkage; 4] = [Linkage::Left, Linkage::Right, Linkage::Scope, Linkage::Type];

    pub fn as_str(&self) -> &'static str {
        match self {
            Linkage::Left => "left",
            Linkage::Right => "right",
            Linkage::Scope => "scope",
            Linkage::Type => "type",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == text)
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_live() -> bool {
    true
}

/// A stored graph primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub id: Id,
    #[serde(default, rename = "type")]
    pub type_id: Option<Id>,
    #[serde(default)]
    pub left: Option<Id>,
    #[serde(default)]
    pub right: Option<Id>,
    #[serde(default)]
    pub scope: Option<Id>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "default_live")]
    pub live: bool,
}

impl Primitive {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            type_id: None,
            left: None,
            right: None,
            scope: None,
            name: None,
            value: None,
            live: true,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_link(mut self, role: Linkage, endpoint: Id) -> Self {
        match role {
            Linkage::Left => self.left = Some(endpoint),
            Linkage::Right => self.right = Some(endpoint),
            Linkage::Scope => self.scope = Some(endpoint),
            Linkage::Type => self.type_id = Some(endpoint),
        }
        self
    }

    pub fn linkage(&self, role: Linkage) -> Option<Id> {
        match role {
            Linkage::Left => self.left,
            Linkage::Right => self.right,
            Linkage::Scope => self.scope,
            Linkage::Type => self.type_id,
        }
    }
}

/// A posting list as handed out by the store
pub enum Postings {
    /// Fully resident in memory
    Resident(Arc<IdSet>),
    /// Loaded on first use through a recovery callback
    Deferred(Box<dyn Recover>),
}

impl fmt::Debug for Postings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Postings::Resident(set) => write!(f, "Resident({} ids)", set.len()),
            Postings::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Index lookups used by evaluation
pub trait IndexStore: Send + Sync {
    /// One past the largest id ever allocated
    fn id_limit(&self) -> Id;

    /// Prefixes at least this long are answered by a single index key
    fn direct_prefix_len(&self) -> usize;

    /// Postings of an indexed word; a key ending in `*` names a direct prefix
    fn word_postings(&self, key: &str) -> StoreResult<Option<Postings>>;

    /// Indexed words starting with `prefix`, in index order
    fn completions(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Primitives whose `role` linkage points at `endpoint`
    fn linkage_postings(&self, role: Linkage, endpoint: Id) -> StoreResult<Option<Postings>>;

    /// Combined (role, endpoint, type) index, where the store maintains one
    fn vip_postings(
        &self,
        _role: Linkage,
        _endpoint: Id,
        _type_id: Id,
    ) -> StoreResult<Option<Postings>> {
        Ok(None)
    }

    /// Every live primitive
    fn live_postings(&self) -> StoreResult<Option<Postings>>;

    fn read_primitive(&self, id: Id) -> StoreResult<Option<Primitive>>;
}
