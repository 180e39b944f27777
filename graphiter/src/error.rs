// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Evaluation error types
//!
//! Exhaustion and budget suspension are not errors: they travel as
//! `Ok(Resume::Done(None))` and `Ok(Resume::Suspended)`. Everything here is
//! either a semantic failure (the query yields an empty result) or a system
//! failure (the query is aborted).

use crate::store::{Id, StoreError};
use thiserror::Error;

/// Iterator errors
#[derive(Error, Debug)]
pub enum IterError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt cursor: {0}")]
    CorruptCursor(String),

    #[error("Impossible constraint: {0}")]
    Impossible(String),

    #[error("Invalid range: low {low} exceeds high {high}")]
    InvalidRange { low: Id, high: Id },

    #[error("The original iterator was dropped while a clone was still in use")]
    OriginalDropped,

    #[error("Set recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("All {count} union branches failed; last error: {last}")]
    AllBranchesFailed { count: usize, last: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl IterError {
    /// Create a corrupt cursor error
    pub fn cursor<S: Into<String>>(msg: S) -> Self {
        Self::CorruptCursor(msg.into())
    }

    /// Create an impossible constraint error
    pub fn impossible<S: Into<String>>(msg: S) -> Self {
        Self::Impossible(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Semantic and lexical failures short-circuit to an empty result
    /// instead of aborting the query.
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            IterError::CorruptCursor(_)
                | IterError::Impossible(_)
                | IterError::InvalidRange { .. }
                | IterError::Cache(CacheError::UnknownStamp(_))
        )
    }
}

impl From<StoreError> for IterError {
    fn from(error: StoreError) -> Self {
        IterError::Storage(error.to_string())
    }
}

/// Ticket cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Payload of {size} bytes exceeds half the {ceiling}-byte ceiling of cache '{cache}'")]
    TooLarge {
        cache: &'static str,
        size: usize,
        ceiling: usize,
    },

    #[error("Unknown or evicted stamp: {0}")]
    UnknownStamp(String),

    #[error("Cursor references cache '{0}', which is not configured")]
    Unavailable(&'static str),
}

/// Incremental sort errors
#[derive(Error, Debug)]
pub enum SortError {
    #[error("A condense is pending; condense() must complete before accepting more candidates")]
    CondensePending,

    #[error("Expected {expected} sort key values, got {got}")]
    KeyArity { expected: usize, got: usize },

    #[error("Invalid sort specification: {0}")]
    InvalidSpec(String),

    #[error("Invalid sort cursor: {0}")]
    BadCursor(String),

    #[error("The sort has already produced its page")]
    Finished,

    #[error("Iterator error: {0}")]
    Iter(#[from] IterError),
}

impl From<SortError> for IterError {
    fn from(error: SortError) -> Self {
        match error {
            SortError::Iter(inner) => inner,
            SortError::BadCursor(msg) => IterError::CorruptCursor(msg),
            other => IterError::Impossible(other.to_string()),
        }
    }
}
