// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Budgeted set iterators
//!
//! A [`SetIterator`] produces the ids of a set, strictly monotonic in its
//! direction and within its `[low, high)` range. Every operation takes a
//! [`Budget`] and may return [`Resume::Suspended`]; the caller retries the
//! identical call later and the iterator resumes where it stopped. An
//! iterator that finds its budget exhausted on entry makes no progress.
//!
//! Clones share expensive state (built unions, result caches, recovered
//! sets) with their original through `Rc` links; a clone's link is weak,
//! so using a clone after its original is gone fails with
//! [`IterError::OriginalDropped`].
//!
//! # Cursor form
//!
//! ```text
//! idset:0-100:3,7,9/7/st:3:1:2
//! ```

pub mod and;
pub mod idset;
pub mod prefix;
pub mod thaw;
pub mod union;
pub mod vip;

pub use and::AndIterator;
pub use idset::{IdSet, IdSetIterator};
pub use prefix::PrefixIterator;
pub use thaw::{thaw, thaw_parts};
pub use union::UnionIterator;
pub use vip::VipIterator;

use crate::budget::{ensure_budget, Budget, IterResult, Resume};
use crate::cache::CursorCaches;
use crate::cursor::{self, FreezeFlags, Position};
use crate::error::IterError;
use crate::store::{Id, Linkage};
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Ordering key of id-ordered iterators
pub const ID_ORDER: &str = "id";

/// Iteration direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// The id after `id` in this direction
    pub fn step(&self, id: Id) -> Option<Id> {
        match self {
            Direction::Forward => id.checked_add(1),
            Direction::Backward => id.checked_sub(1),
        }
    }

    /// True if `a` is produced before `b`
    pub fn precedes(&self, a: Id, b: Id) -> bool {
        match self {
            Direction::Forward => a < b,
            Direction::Backward => a > b,
        }
    }

    pub fn is_forward(&self) -> bool {
        *self == Direction::Forward
    }
}

/// Half-open id range `[low, high)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub low: Id,
    pub high: Id,
}

impl IdRange {
    pub fn new(low: Id, high: Id) -> Result<Self, IterError> {
        if low > high {
            return Err(IterError::InvalidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// Every id below `limit`
    pub fn up_to(limit: Id) -> Self {
        Self { low: 0, high: limit }
    }

    pub fn contains(&self, id: Id) -> bool {
        self.low <= id && id < self.high
    }

    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    pub fn len(&self) -> u64 {
        self.high.saturating_sub(self.low)
    }

    /// First id in iteration order, if the range is not empty
    pub fn first(&self, direction: Direction) -> Option<Id> {
        if self.is_empty() {
            return None;
        }
        match direction {
            Direction::Forward => Some(self.low),
            Direction::Backward => Some(self.high - 1),
        }
    }

    pub fn intersect(&self, other: &IdRange) -> IdRange {
        let low = self.low.max(other.low);
        let high = self.high.min(other.high).max(low);
        IdRange { low, high }
    }
}

/// Cost and size statistics of an iterator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IteratorStats {
    /// Number of ids the iterator produces (an upper bound)
    pub n: u64,
    /// Average cost of one `next`
    pub next_cost: i64,
    /// Average cost of one `find`
    pub find_cost: i64,
    /// Average cost of one `check`
    pub check_cost: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorKind {
    Prefix,
    Vip,
    IdSet,
    Union,
    And,
}

impl IteratorKind {
    /// Cursor tag
    pub fn as_str(&self) -> &'static str {
        match self {
            IteratorKind::Prefix => "prefix",
            IteratorKind::Vip => "vip",
            IteratorKind::IdSet => "idset",
            IteratorKind::Union => "or",
            IteratorKind::And => "and",
        }
    }
}

impl fmt::Display for IteratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linkage constraints every produced primitive satisfies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveSummary {
    pub linkages: Vec<(Linkage, Id)>,
    /// The iterator produces exactly the primitives matching `linkages`
    pub complete: bool,
}

impl PrimitiveSummary {
    /// Whether every id of `self` necessarily satisfies `other`
    pub fn implies(&self, other: &PrimitiveSummary) -> bool {
        other.complete && other.linkages.iter().all(|l| self.linkages.contains(l))
    }
}

/// Cheap bounds on what an iterator may still produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEstimate {
    pub low: Id,
    pub high: Id,
    pub n_max: Option<u64>,
    /// `low`/`high` are actual produced ids rather than range bounds
    pub exact: bool,
}

impl RangeEstimate {
    pub fn from_range(range: IdRange, n_max: Option<u64>) -> Self {
        Self {
            low: range.low,
            high: range.high,
            n_max,
            exact: false,
        }
    }
}

/// A lazily evaluated, budgeted id set
///
/// Exhaustion is `Ok(Resume::Done(None))`; suspension is
/// `Ok(Resume::Suspended)` and the identical call must be repeated.
pub trait SetIterator: fmt::Debug {
    fn kind(&self) -> IteratorKind;

    fn range(&self) -> IdRange;

    fn direction(&self) -> Direction;

    fn position(&self) -> Position;

    /// False for clones, which share state owned by their original
    fn is_original(&self) -> bool;

    /// Key the output is sorted by
    fn ordering(&self) -> Option<&str> {
        Some(ID_ORDER)
    }

    fn sorted(&self) -> bool {
        true
    }

    /// Produce the next id, or `None` when exhausted
    fn next(&mut self, budget: &mut Budget) -> IterResult<Option<Id>>;

    /// Position on the first id at or past `id` in iteration order.
    /// Never returns an id already produced.
    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>>;

    /// Membership test; does not move the iterator
    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool>;

    /// Compute (or return cached) statistics
    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats>;

    /// Statistics, if already known
    fn stats(&self) -> Option<IteratorStats>;

    /// Return to the start of the output
    fn reset(&mut self) -> Result<(), IterError>;

    /// Create an independent iterator over the same set at the same position
    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError>;

    /// Serialize to cursor text; the set-spec is always written
    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError>;

    /// Whether every id still to come lies strictly past `value` in the
    /// iterator's ordering
    fn beyond(&mut self, value: &Value, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        Ok(Resume::Done(match value.as_id() {
            Some(v) => self.position().beyond(v, self.range(), self.direction()),
            None => false,
        }))
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        None
    }

    fn range_estimate(&self) -> RangeEstimate {
        RangeEstimate::from_range(self.range(), self.stats().map(|s| s.n))
    }

    /// The fully resident set behind this iterator, if any
    fn resident_set(&self) -> Option<Arc<IdSet>> {
        None
    }

    /// Convert to a boxed trait object
    fn boxed(self) -> Box<dyn SetIterator>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

/// Link from an iterator to state shared with its clones
pub(crate) enum SharedLink<T> {
    Original(Rc<RefCell<T>>),
    Clone(Weak<RefCell<T>>),
}

impl<T> SharedLink<T> {
    pub(crate) fn new(value: T) -> Self {
        SharedLink::Original(Rc::new(RefCell::new(value)))
    }

    pub(crate) fn get(&self) -> Result<Rc<RefCell<T>>, IterError> {
        match self {
            SharedLink::Original(rc) => Ok(rc.clone()),
            SharedLink::Clone(weak) => weak.upgrade().ok_or(IterError::OriginalDropped),
        }
    }

    /// A weak link for a clone
    pub(crate) fn clone_link(&self) -> Self {
        match self {
            SharedLink::Original(rc) => SharedLink::Clone(Rc::downgrade(rc)),
            SharedLink::Clone(weak) => SharedLink::Clone(weak.clone()),
        }
    }

    pub(crate) fn is_original(&self) -> bool {
        matches!(self, SharedLink::Original(_))
    }
}

/// Assemble cursor text from an iterator's parts according to `flags`
pub(crate) fn freeze_cursor(
    set: String,
    position: Position,
    state: Option<String>,
    flags: FreezeFlags,
    caches: &CursorCaches,
) -> String {
    let position = flags.position.then(|| position.to_string());
    let state = if flags.state {
        state.map(|s| caches.encode_state(s))
    } else {
        None
    };
    cursor::assemble(set, position, state)
}

/// Set-spec prefix shared by all kinds: `kind:[~]low-high`
pub(crate) fn set_header(kind: IteratorKind, direction: Direction, range: IdRange) -> String {
    format!("{}:{}", kind, cursor::format_header(direction, range))
}
