// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory id sets and their iterator
//!
//! An [`IdSetIterator`] walks a sorted [`IdSet`]. The set may be resident
//! from the start or recovered on first use through a [`Recover`] callback,
//! which can itself suspend. Recovery happens once per original; clones
//! reuse the recovered set. An optional finish callback receives the set
//! when the original is dropped.

use crate::budget::{cost, ensure_budget, try_resume, Budget, IterResult, Resume};
use crate::cache::{CursorCaches, Stamp, Storable, Ticket};
use crate::cursor::{format_stats, parse_ids, FreezeFlags, Position};
use crate::error::{CacheError, IterError};
use crate::iter::{
    freeze_cursor, set_header, Direction, IdRange, IteratorKind, IteratorStats, PrimitiveSummary,
    RangeEstimate, SetIterator, SharedLink,
};
use crate::store::{Id, Postings};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Sorted, duplicate-free set of ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct IdSet {
    ids: Vec<Id>,
}

impl IdSet {
    /// Build from arbitrary ids
    pub fn new(mut ids: Vec<Id>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Build from ids already sorted and unique
    pub fn from_sorted(ids: Vec<Id>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[Id] {
        &self.ids
    }

    pub fn contains(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Index of the first id at or above `id`
    pub fn lower_bound(&self, id: Id) -> usize {
        self.ids.partition_point(|x| *x < id)
    }

    pub fn intersect(&self, other: &IdSet) -> IdSet {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::with_capacity(self.len().min(other.len()));
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        IdSet { ids: out }
    }

    /// Members within `range`
    pub fn restrict(&self, range: IdRange) -> IdSet {
        let lo = self.lower_bound(range.low);
        let hi = self.lower_bound(range.high).max(lo);
        IdSet {
            ids: self.ids[lo..hi].to_vec(),
        }
    }
}

impl FromIterator<Id> for IdSet {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        IdSet::new(iter.into_iter().collect())
    }
}

impl Storable for IdSet {
    fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.ids.len() * std::mem::size_of::<Id>()
    }
}

/// Produces a set that was not resident, possibly over several calls
pub trait Recover: 'static {
    fn recover(&mut self, budget: &mut Budget) -> IterResult<Arc<IdSet>>;
}

impl<F> Recover for F
where
    F: FnMut(&mut Budget) -> IterResult<Arc<IdSet>> + 'static,
{
    fn recover(&mut self, budget: &mut Budget) -> IterResult<Arc<IdSet>> {
        self(budget)
    }
}

type FinishFn = Box<dyn FnOnce(&Arc<IdSet>)>;

enum Backing {
    Pending(Box<dyn Recover>),
    Ready(Arc<IdSet>),
    Failed(String),
}

struct IdSetShared {
    backing: Backing,
    on_finish: Option<FinishFn>,
}

impl Drop for IdSetShared {
    fn drop(&mut self) {
        if let (Backing::Ready(set), Some(finish)) = (&self.backing, self.on_finish.take()) {
            finish(set);
        }
    }
}

/// Iterator over an in-memory id set
pub struct IdSetIterator {
    link: SharedLink<IdSetShared>,
    set: Option<Arc<IdSet>>,
    range: IdRange,
    direction: Direction,
    // Index bounds of `range` within the set, valid once the set is known
    lo: usize,
    hi: usize,
    // Forward: index of the next candidate. Backward: one past it.
    cursor: usize,
    position: Position,
    stats: Option<IteratorStats>,
    summary: Option<PrimitiveSummary>,
}

impl IdSetIterator {
    /// Iterate a resident set
    pub fn new(set: Arc<IdSet>, range: IdRange, direction: Direction) -> Self {
        let mut iter = Self::with_backing(Backing::Ready(set.clone()), range, direction);
        iter.install(set);
        iter
    }

    /// Iterate a set recovered on first use
    pub fn deferred(recover: Box<dyn Recover>, range: IdRange, direction: Direction) -> Self {
        Self::with_backing(Backing::Pending(recover), range, direction)
    }

    pub fn empty(range: IdRange, direction: Direction) -> Self {
        Self::new(Arc::new(IdSet::default()), range, direction)
    }

    /// Iterate a posting list handed out by the store
    pub fn from_postings(postings: Postings, range: IdRange, direction: Direction) -> Self {
        match postings {
            Postings::Resident(set) => Self::new(set, range, direction),
            Postings::Deferred(recover) => Self::deferred(recover, range, direction),
        }
    }

    fn with_backing(backing: Backing, range: IdRange, direction: Direction) -> Self {
        Self {
            link: SharedLink::new(IdSetShared {
                backing,
                on_finish: None,
            }),
            set: None,
            range,
            direction,
            lo: 0,
            hi: 0,
            cursor: 0,
            position: Position::Start,
            stats: None,
            summary: None,
        }
    }

    /// Call `finish` with the recovered set when the original is dropped
    pub fn on_finish<F: FnOnce(&Arc<IdSet>) + 'static>(self, finish: F) -> Self {
        if let Ok(shared) = self.link.get() {
            shared.borrow_mut().on_finish = Some(Box::new(finish));
        }
        self
    }

    pub fn with_summary(mut self, summary: PrimitiveSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub(crate) fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        if let Some(set) = self.set.clone() {
            self.install(set);
        }
        self
    }

    pub(crate) fn with_stats(mut self, stats: Option<IteratorStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Recover the set if needed and position the cursor
    fn ensure_set(&mut self, budget: &mut Budget) -> IterResult<Arc<IdSet>> {
        if let Some(set) = &self.set {
            return Ok(Resume::Done(set.clone()));
        }

        let shared = self.link.get()?;
        let set = {
            let mut guard = shared.borrow_mut();
            let outcome = match &mut guard.backing {
                Backing::Ready(set) => Ok(Resume::Done(set.clone())),
                Backing::Failed(msg) => Err(IterError::RecoveryFailed(msg.clone())),
                Backing::Pending(recover) => recover.recover(budget),
            };
            match outcome {
                Ok(Resume::Done(set)) => {
                    if matches!(guard.backing, Backing::Pending(_)) {
                        log::debug!("Recovered id set of {} ids", set.len());
                    }
                    guard.backing = Backing::Ready(set.clone());
                    set
                }
                Ok(Resume::Suspended) => return Ok(Resume::Suspended),
                Err(e) => {
                    log::warn!("Id set recovery failed: {}", e);
                    if !matches!(guard.backing, Backing::Failed(_)) {
                        guard.backing = Backing::Failed(e.to_string());
                    }
                    return Err(match e {
                        IterError::RecoveryFailed(msg) => IterError::RecoveryFailed(msg),
                        other => IterError::RecoveryFailed(other.to_string()),
                    });
                }
            }
        };

        self.install(set.clone());
        Ok(Resume::Done(set))
    }

    fn install(&mut self, set: Arc<IdSet>) {
        self.lo = set.lower_bound(self.range.low);
        self.hi = set.lower_bound(self.range.high).max(self.lo);
        self.cursor = match (self.position, self.direction) {
            (Position::Start, Direction::Forward) | (Position::End, Direction::Backward) => self.lo,
            (Position::Start, Direction::Backward) | (Position::End, Direction::Forward) => self.hi,
            (Position::At(id), Direction::Forward) => {
                set.lower_bound(id.saturating_add(1)).clamp(self.lo, self.hi)
            }
            (Position::At(id), Direction::Backward) => set.lower_bound(id).clamp(self.lo, self.hi),
        };
        self.set = Some(set);
    }

    fn remaining(&self) -> &[Id] {
        match &self.set {
            Some(set) => match self.direction {
                Direction::Forward => &set.as_slice()[self.cursor..self.hi],
                Direction::Backward => &set.as_slice()[self.lo..self.cursor],
            },
            None => &[],
        }
    }

    /// Thaw from the body of an `idset:` set-spec (after the range header)
    pub(crate) fn thaw_body(
        body: &str,
        range: IdRange,
        direction: Direction,
        caches: &CursorCaches,
    ) -> Result<Self, IterError> {
        let set = match body.strip_prefix('@') {
            Some(stamp_text) => {
                let stamp = Stamp::parse(stamp_text)
                    .ok_or_else(|| IterError::cursor(format!("bad stamp '{}'", stamp_text)))?;
                let cache = caches
                    .sets
                    .as_ref()
                    .ok_or(CacheError::Unavailable("idset"))?;
                cache.thaw(&stamp)?
            }
            None => Arc::new(IdSet::new(parse_ids(body)?)),
        };
        Ok(Self::new(set, range, direction))
    }
}

impl fmt::Debug for IdSetIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdSetIterator")
            .field("range", &self.range)
            .field("direction", &self.direction)
            .field("position", &self.position)
            .field("recovered", &self.set.as_ref().map(|s| s.len()))
            .field("original", &self.link.is_original())
            .finish()
    }
}

impl SetIterator for IdSetIterator {
    fn kind(&self) -> IteratorKind {
        IteratorKind::IdSet
    }

    fn range(&self) -> IdRange {
        self.range
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn position(&self) -> Position {
        self.position
    }

    fn is_original(&self) -> bool {
        self.link.is_original()
    }

    fn next(&mut self, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        if self.position == Position::End {
            return Ok(Resume::Done(None));
        }
        let set = try_resume!(self.ensure_set(budget));
        budget.charge(cost::SET_NEXT);

        let ids = set.as_slice();
        let produced = match self.direction {
            Direction::Forward if self.cursor < self.hi => {
                self.cursor += 1;
                Some(ids[self.cursor - 1])
            }
            Direction::Backward if self.cursor > self.lo => {
                self.cursor -= 1;
                Some(ids[self.cursor])
            }
            _ => None,
        };
        self.position = produced.map_or(Position::End, Position::At);
        Ok(Resume::Done(produced))
    }

    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        let target = match self.position.clamp_find(id, self.direction) {
            Some(target) => target,
            None => return Ok(Resume::Done(None)),
        };
        let set = try_resume!(self.ensure_set(budget));
        budget.charge(cost::SET_FIND);

        let ids = set.as_slice();
        let produced = match self.direction {
            Direction::Forward => {
                let idx = set.lower_bound(target).clamp(self.lo, self.hi);
                if idx < self.hi {
                    self.cursor = idx + 1;
                    Some(ids[idx])
                } else {
                    self.cursor = self.hi;
                    None
                }
            }
            Direction::Backward => {
                let idx = set
                    .lower_bound(target.saturating_add(1))
                    .clamp(self.lo, self.hi);
                if idx > self.lo {
                    self.cursor = idx - 1;
                    Some(ids[idx - 1])
                } else {
                    self.cursor = self.lo;
                    None
                }
            }
        };
        self.position = produced.map_or(Position::End, Position::At);
        Ok(Resume::Done(produced))
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        if !self.range.contains(id) {
            return Ok(Resume::Done(false));
        }
        let set = try_resume!(self.ensure_set(budget));
        budget.charge(cost::SET_FIND);
        Ok(Resume::Done(set.contains(id)))
    }

    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats> {
        ensure_budget!(budget);
        if let Some(stats) = self.stats {
            return Ok(Resume::Done(stats));
        }
        try_resume!(self.ensure_set(budget));
        let stats = IteratorStats {
            n: (self.hi - self.lo) as u64,
            next_cost: cost::SET_NEXT,
            find_cost: cost::SET_FIND,
            check_cost: cost::SET_FIND,
        };
        self.stats = Some(stats);
        Ok(Resume::Done(stats))
    }

    fn stats(&self) -> Option<IteratorStats> {
        self.stats
    }

    fn reset(&mut self) -> Result<(), IterError> {
        self.position = Position::Start;
        if let Some(set) = self.set.clone() {
            self.install(set);
        }
        Ok(())
    }

    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError> {
        // Fail early rather than on first use
        self.link.get()?;
        Ok(Box::new(IdSetIterator {
            link: self.link.clone_link(),
            set: self.set.clone(),
            range: self.range,
            direction: self.direction,
            lo: self.lo,
            hi: self.hi,
            cursor: self.cursor,
            position: self.position,
            stats: self.stats,
            summary: self.summary.clone(),
        }))
    }

    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError> {
        let set = match self.ensure_set(&mut Budget::unlimited())? {
            Resume::Done(set) => set,
            Resume::Suspended => {
                return Err(IterError::RecoveryFailed(
                    "recovery suspended under an unlimited budget".to_string(),
                ))
            }
        };

        let members = &set.as_slice()[self.lo..self.hi];
        let inline = || {
            members
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let body = match &caches.sets {
            Some(cache) if members.len() > caches.set_inline_limit => {
                let payload = if members.len() == set.len() {
                    set.clone()
                } else {
                    Arc::new(IdSet::from_sorted(members.to_vec()))
                };
                match cache.store_shared(payload) {
                    Ticket::Stamp(stamp) => format!("@{}", stamp),
                    Ticket::Rejected => inline(),
                }
            }
            _ => inline(),
        };

        let spec = format!(
            "{}:{}",
            set_header(IteratorKind::IdSet, self.direction, self.range),
            body
        );
        let state = self.stats.as_ref().map(format_stats);
        Ok(freeze_cursor(spec, self.position, state, flags, caches))
    }

    fn beyond(&mut self, value: &Value, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        let bound = match value.as_id() {
            Some(bound) => bound,
            None => return Ok(Resume::Done(false)),
        };
        try_resume!(self.ensure_set(budget));
        let next = match self.direction {
            Direction::Forward => self.remaining().first(),
            Direction::Backward => self.remaining().last(),
        };
        Ok(Resume::Done(match next {
            None => true,
            Some(next) => self.direction.precedes(bound, *next),
        }))
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        self.summary.clone()
    }

    fn range_estimate(&self) -> RangeEstimate {
        if self.set.is_none() {
            return RangeEstimate::from_range(self.range, self.stats.map(|s| s.n));
        }
        let remaining = self.remaining();
        match (remaining.first(), remaining.last()) {
            (Some(first), Some(last)) => RangeEstimate {
                low: *first,
                high: last + 1,
                n_max: Some(remaining.len() as u64),
                exact: true,
            },
            _ => RangeEstimate {
                low: self.range.low,
                high: self.range.low,
                n_max: Some(0),
                exact: true,
            },
        }
    }

    fn resident_set(&self) -> Option<Arc<IdSet>> {
        let set = self.set.as_ref()?;
        if self.lo == 0 && self.hi == set.len() {
            Some(set.clone())
        } else {
            Some(Arc::new(set.restrict(self.range)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn budget() -> Budget {
        Budget::new(1_000)
    }

    fn drain(iter: &mut dyn SetIterator) -> Vec<Id> {
        let mut out = Vec::new();
        let mut budget = budget();
        while let Resume::Done(Some(id)) = iter.next(&mut budget).unwrap() {
            out.push(id);
        }
        out
    }

    fn iter_over(ids: &[Id], low: Id, high: Id, direction: Direction) -> IdSetIterator {
        IdSetIterator::new(
            Arc::new(IdSet::new(ids.to_vec())),
            IdRange::new(low, high).unwrap(),
            direction,
        )
    }

    #[test]
    fn test_idset_construction() {
        let set = IdSet::new(vec![5, 1, 5, 3]);
        assert_eq!(set.as_slice(), &[1, 3, 5]);
        assert_eq!(set.lower_bound(4), 2);
        assert_eq!(set.intersect(&IdSet::new(vec![3, 4, 5])).as_slice(), &[3, 5]);
        assert_eq!(
            set.restrict(IdRange::new(2, 5).unwrap()).as_slice(),
            &[3]
        );
    }

    #[test]
    fn test_next_respects_range_and_direction() {
        let mut forward = iter_over(&[1, 4, 6, 9, 12], 4, 12, Direction::Forward);
        assert_eq!(drain(&mut forward), vec![4, 6, 9]);

        let mut backward = iter_over(&[1, 4, 6, 9, 12], 4, 12, Direction::Backward);
        assert_eq!(drain(&mut backward), vec![9, 6, 4]);
        assert_eq!(backward.position(), Position::End);
    }

    #[test]
    fn test_find_never_rewinds() {
        let mut iter = iter_over(&[2, 4, 6, 8], 0, 100, Direction::Forward);
        let mut b = budget();
        assert_eq!(iter.find(5, &mut b).unwrap(), Resume::Done(Some(6)));
        assert_eq!(iter.find(1, &mut b).unwrap(), Resume::Done(Some(8)));
        assert_eq!(iter.find(1, &mut b).unwrap(), Resume::Done(None));

        let mut iter = iter_over(&[2, 4, 6, 8], 0, 100, Direction::Backward);
        assert_eq!(iter.find(5, &mut b).unwrap(), Resume::Done(Some(4)));
        assert_eq!(iter.next(&mut b).unwrap(), Resume::Done(Some(2)));
    }

    #[test]
    fn test_check_does_not_move() {
        let mut iter = iter_over(&[2, 4, 6], 0, 5, Direction::Forward);
        let mut b = budget();
        assert_eq!(iter.check(4, &mut b).unwrap(), Resume::Done(true));
        assert_eq!(iter.check(6, &mut b).unwrap(), Resume::Done(false));
        assert_eq!(iter.check(3, &mut b).unwrap(), Resume::Done(false));
        assert_eq!(drain(&mut iter), vec![2, 4]);
    }

    #[test]
    fn test_deferred_recovery_suspends_and_resumes() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let recover = move |budget: &mut Budget| -> IterResult<Arc<IdSet>> {
            counter.set(counter.get() + 1);
            ensure_budget!(budget);
            budget.charge(50);
            Ok(Resume::Done(Arc::new(IdSet::new(vec![3, 1, 2]))))
        };
        let mut iter = IdSetIterator::deferred(
            Box::new(recover),
            IdRange::up_to(10),
            Direction::Forward,
        );

        let mut starved = Budget::new(0);
        assert!(iter.next(&mut starved).unwrap().is_suspended());
        assert_eq!(calls.get(), 0);

        let mut b = budget();
        assert_eq!(iter.next(&mut b).unwrap(), Resume::Done(Some(1)));
        let mut clone = iter.clone_iter().unwrap();
        assert_eq!(drain(clone.as_mut()), vec![2, 3]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_reset_before_recovery_is_deferred() {
        let recover = |_: &mut Budget| -> IterResult<Arc<IdSet>> {
            Ok(Resume::Done(Arc::new(IdSet::new(vec![7, 8]))))
        };
        let mut iter =
            IdSetIterator::deferred(Box::new(recover), IdRange::up_to(10), Direction::Forward);
        iter.reset().unwrap();
        assert_eq!(drain(&mut iter), vec![7, 8]);
    }

    #[test]
    fn test_failed_recovery_is_reported() {
        let recover = |_: &mut Budget| -> IterResult<Arc<IdSet>> {
            Err(IterError::storage("posting file missing"))
        };
        let mut iter =
            IdSetIterator::deferred(Box::new(recover), IdRange::up_to(10), Direction::Forward);
        let err = iter.next(&mut budget()).unwrap_err();
        assert!(matches!(err, IterError::RecoveryFailed(ref msg) if msg.contains("missing")));
        assert!(iter.next(&mut budget()).is_err());
    }

    #[test]
    fn test_finish_callback_runs_on_original_drop() {
        let seen = Rc::new(Cell::new(0usize));
        let sink = seen.clone();
        let iter = iter_over(&[1, 2, 3], 0, 10, Direction::Forward)
            .on_finish(move |set| sink.set(set.len()));
        let mut clone = iter.clone_iter().unwrap();

        drop(iter);
        assert_eq!(seen.get(), 3);
        // Clones keep working from their memoized set, but cannot be cloned
        assert_eq!(drain(clone.as_mut()), vec![1, 2, 3]);
        assert!(matches!(clone.clone_iter(), Err(IterError::OriginalDropped)));
    }

    #[test]
    fn test_beyond_uses_next_candidate() {
        let mut iter = iter_over(&[2, 10, 20], 0, 100, Direction::Forward);
        let mut b = budget();
        assert_eq!(iter.beyond(&Value::Id(1), &mut b).unwrap(), Resume::Done(true));
        assert_eq!(iter.beyond(&Value::Id(5), &mut b).unwrap(), Resume::Done(false));
        iter.next(&mut b).unwrap();
        assert_eq!(iter.beyond(&Value::Id(5), &mut b).unwrap(), Resume::Done(true));
        assert_eq!(
            iter.beyond(&Value::Text("x".into()), &mut b).unwrap(),
            Resume::Done(false)
        );
    }

    #[test]
    fn test_freeze_and_stats() {
        let mut iter = iter_over(&[1, 2, 3, 50], 0, 10, Direction::Forward);
        let mut b = budget();
        iter.statistics(&mut b).unwrap();
        iter.next(&mut b).unwrap();
        let text = iter.freeze(FreezeFlags::ALL, &CursorCaches::none()).unwrap();
        assert_eq!(text, "idset:0-10:1,2,3/1/st:3:1:2:2");

        let estimate = iter.range_estimate();
        assert_eq!((estimate.low, estimate.high, estimate.n_max), (2, 4, Some(2)));
    }

    #[test]
    fn test_large_sets_freeze_to_a_stamp() {
        let caches = CursorCaches::default();
        let ids: Vec<Id> = (0..100).collect();
        let mut iter = iter_over(&ids, 0, 1_000, Direction::Backward);
        let text = iter.freeze(FreezeFlags::SET, &caches).unwrap();
        assert!(text.starts_with("idset:~0-1000:@"));

        let body = text.trim_start_matches("idset:~0-1000:");
        let mut thawed = IdSetIterator::thaw_body(
            body,
            IdRange::up_to(1_000),
            Direction::Backward,
            &caches,
        )
        .unwrap();
        assert_eq!(drain(&mut thawed).len(), 100);
    }
}
