// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! VIP iterator: primitives linking an endpoint through a role, of a type
//!
//! A decorator around whatever sub-iterator answers the question most
//! cheaply. Construction prefers the store's combined VIP index, then a
//! direct intersection of resident posting lists, then a bounded merge walk
//! that materializes a small fixed list. When the walk would exceed its cap
//! the iterator falls back to a lazy intersection.
//!
//! Everything but `check`, `primitive_summary` and `freeze` passes straight
//! through to the sub-iterator.

use crate::budget::{cost, ensure_budget, Budget, IterResult, Resume};
use crate::cache::CursorCaches;
use crate::config::VipConfig;
use crate::cursor::{FreezeFlags, Position};
use crate::error::IterError;
use crate::iter::and::AndIterator;
use crate::iter::idset::{IdSet, IdSetIterator};
use crate::iter::{
    freeze_cursor, set_header, Direction, IdRange, IteratorKind, IteratorStats, PrimitiveSummary,
    RangeEstimate, SetIterator,
};
use crate::store::{Id, IndexStore, Linkage, Postings};
use crate::value::Value;
use nom::{
    bytes::complete::tag,
    character::complete::{alpha1, char, u64 as parse_u64},
    combinator::all_consuming,
    sequence::tuple,
};
use std::fmt;
use std::sync::Arc;

/// How a VIP iterator's sub-iterator was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VipStrategy {
    /// The store's combined role/endpoint/type index
    Indexed,
    /// Intersection of two resident posting lists
    Intersected,
    /// Fixed list from a bounded merge walk
    Merged,
    /// Lazy intersection after the merge walk overflowed
    Lazy,
    /// One of the posting lists does not exist
    Empty,
    /// Caller-supplied sub-iterator
    Wrapped,
}

/// Iterator over primitives with `role -> endpoint` and type `type_id`
pub struct VipIterator {
    store: Arc<dyn IndexStore>,
    role: Linkage,
    endpoint: Id,
    type_id: Id,
    sub: Box<dyn SetIterator>,
    strategy: VipStrategy,
}

impl VipIterator {
    /// Build the cheapest available sub-iterator. Store reads and the merge
    /// walk are charged to `budget` but never suspend.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        store: Arc<dyn IndexStore>,
        role: Linkage,
        endpoint: Id,
        type_id: Id,
        range: IdRange,
        direction: Direction,
        config: &VipConfig,
        budget: &mut Budget,
    ) -> Result<Self, IterError> {
        Self::create_at(
            store,
            (role, endpoint, type_id),
            range,
            direction,
            Position::Start,
            config,
            budget,
        )
    }

    /// Decorate an existing sub-iterator known to produce exactly the
    /// primitives matching role, endpoint and type
    pub fn wrap(
        store: Arc<dyn IndexStore>,
        role: Linkage,
        endpoint: Id,
        type_id: Id,
        sub: Box<dyn SetIterator>,
    ) -> Self {
        Self {
            store,
            role,
            endpoint,
            type_id,
            sub,
            strategy: VipStrategy::Wrapped,
        }
    }

    pub(crate) fn create_at(
        store: Arc<dyn IndexStore>,
        (role, endpoint, type_id): (Linkage, Id, Id),
        range: IdRange,
        direction: Direction,
        position: Position,
        config: &VipConfig,
        budget: &mut Budget,
    ) -> Result<Self, IterError> {
        let fixed = |ids: Arc<IdSet>| -> Box<dyn SetIterator> {
            IdSetIterator::new(ids, range, direction)
                .with_position(position)
                .boxed()
        };

        budget.charge(cost::POSTING_OPEN);
        let (sub, strategy) = if let Some(postings) =
            store.vip_postings(role, endpoint, type_id)?
        {
            let sub = IdSetIterator::from_postings(postings, range, direction)
                .with_position(position)
                .boxed();
            (sub, VipStrategy::Indexed)
        } else {
            budget.charge(cost::POSTING_OPEN);
            let linked = store.linkage_postings(role, endpoint)?;
            let typed = store.linkage_postings(Linkage::Type, type_id)?;
            match (linked, typed) {
                (Some(Postings::Resident(a)), Some(Postings::Resident(b))) => {
                    budget.charge(cost::INTERSECT * (a.len() + b.len()) as i64);
                    (fixed(Arc::new(a.intersect(&b))), VipStrategy::Intersected)
                }
                (Some(a), Some(b)) => {
                    let mut left = IdSetIterator::from_postings(a, range, direction);
                    let mut right = IdSetIterator::from_postings(b, range, direction);
                    let mut walk = Budget::unlimited();
                    let outcome = merge_walk(&mut left, &mut right, config.merge_cap, &mut walk);
                    budget.charge(walk.spent());
                    match outcome? {
                        Some(ids) => (fixed(Arc::new(IdSet::new(ids))), VipStrategy::Merged),
                        None => {
                            left.reset()?;
                            right.reset()?;
                            let lazy =
                                AndIterator::new(vec![left.boxed(), right.boxed()], range, direction)?
                                    .resume_at(position, None);
                            (lazy.boxed(), VipStrategy::Lazy)
                        }
                    }
                }
                _ => (fixed(Arc::new(IdSet::default())), VipStrategy::Empty),
            }
        };

        log::debug!(
            "VIP {}->{} type {} built by {:?}",
            role,
            endpoint,
            type_id,
            strategy
        );
        Ok(Self {
            store,
            role,
            endpoint,
            type_id,
            sub,
            strategy,
        })
    }

    pub fn strategy(&self) -> VipStrategy {
        self.strategy
    }

    pub fn role(&self) -> Linkage {
        self.role
    }

    pub fn endpoint(&self) -> Id {
        self.endpoint
    }

    pub fn type_id(&self) -> Id {
        self.type_id
    }

    /// Parse `role+type->endpoint`
    pub(crate) fn parse_body(body: &str) -> Result<(Linkage, Id, Id), IterError> {
        let parsed = all_consuming(tuple((
            alpha1::<&str, nom::error::Error<&str>>,
            char('+'),
            parse_u64,
            tag("->"),
            parse_u64,
        )))(body);
        let (_, (role, _, type_id, _, endpoint)) =
            parsed.map_err(|_| IterError::cursor(format!("bad vip body '{}'", body)))?;
        let role = Linkage::parse(role)
            .ok_or_else(|| IterError::cursor(format!("unknown role '{}'", role)))?;
        Ok((role, endpoint, type_id))
    }

    /// Test the primitive record itself
    fn check_by_read(&self, id: Id, budget: &mut Budget) -> Result<bool, IterError> {
        budget.charge(cost::PRIMITIVE_READ);
        Ok(match self.store.read_primitive(id)? {
            Some(primitive) => {
                primitive.live
                    && primitive.linkage(self.role) == Some(self.endpoint)
                    && primitive.type_id == Some(self.type_id)
            }
            None => false,
        })
    }
}

/// Leapfrog two iterators, giving up once more than `cap` ids match
fn merge_walk(
    a: &mut dyn SetIterator,
    b: &mut dyn SetIterator,
    cap: usize,
    budget: &mut Budget,
) -> Result<Option<Vec<Id>>, IterError> {
    let settle = |step: Resume<Option<Id>>| -> Result<Option<Id>, IterError> {
        step.done().ok_or_else(|| {
            IterError::RecoveryFailed("merge walk suspended under an unlimited budget".to_string())
        })
    };

    let mut out = Vec::new();
    let mut candidate = settle(a.next(budget)?)?;
    while let Some(id) = candidate {
        match settle(b.find(id, budget)?)? {
            None => break,
            Some(found) if found == id => {
                out.push(id);
                if out.len() > cap {
                    log::debug!("VIP merge walk passed its cap of {}", cap);
                    return Ok(None);
                }
                candidate = settle(a.next(budget)?)?;
            }
            Some(found) => candidate = settle(a.find(found, budget)?)?,
        }
    }
    Ok(Some(out))
}

impl fmt::Debug for VipIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VipIterator")
            .field("role", &self.role)
            .field("endpoint", &self.endpoint)
            .field("type_id", &self.type_id)
            .field("strategy", &self.strategy)
            .field("sub", &self.sub)
            .finish()
    }
}

impl SetIterator for VipIterator {
    fn kind(&self) -> IteratorKind {
        IteratorKind::Vip
    }

    fn range(&self) -> IdRange {
        self.sub.range()
    }

    fn direction(&self) -> Direction {
        self.sub.direction()
    }

    fn position(&self) -> Position {
        self.sub.position()
    }

    fn is_original(&self) -> bool {
        self.sub.is_original()
    }

    fn ordering(&self) -> Option<&str> {
        self.sub.ordering()
    }

    fn sorted(&self) -> bool {
        self.sub.sorted()
    }

    fn next(&mut self, budget: &mut Budget) -> IterResult<Option<Id>> {
        self.sub.next(budget)
    }

    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        self.sub.find(id, budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        if !self.sub.range().contains(id) {
            return Ok(Resume::Done(false));
        }
        let read_is_cheaper = self
            .sub
            .stats()
            .map_or(false, |stats| cost::PRIMITIVE_READ < stats.check_cost);
        if read_is_cheaper {
            Ok(Resume::Done(self.check_by_read(id, budget)?))
        } else {
            self.sub.check(id, budget)
        }
    }

    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats> {
        self.sub.statistics(budget)
    }

    fn stats(&self) -> Option<IteratorStats> {
        self.sub.stats()
    }

    fn reset(&mut self) -> Result<(), IterError> {
        self.sub.reset()
    }

    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError> {
        Ok(Box::new(VipIterator {
            store: self.store.clone(),
            role: self.role,
            endpoint: self.endpoint,
            type_id: self.type_id,
            sub: self.sub.clone_iter()?,
            strategy: self.strategy,
        }))
    }

    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError> {
        let spec = format!(
            "{}:{}+{}->{}",
            set_header(IteratorKind::Vip, self.direction(), self.range()),
            self.role,
            self.type_id,
            self.endpoint
        );
        let nested = if flags.state {
            let sub_flags = FreezeFlags {
                position: flags.position,
                ..FreezeFlags::ALL
            };
            Some(self.sub.freeze(sub_flags, caches)?)
        } else {
            None
        };
        Ok(freeze_cursor(spec, self.position(), nested, flags, caches))
    }

    fn beyond(&mut self, value: &Value, budget: &mut Budget) -> IterResult<bool> {
        self.sub.beyond(value, budget)
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        Some(PrimitiveSummary {
            linkages: vec![(self.role, self.endpoint), (Linkage::Type, self.type_id)],
            complete: true,
        })
    }

    fn range_estimate(&self) -> RangeEstimate {
        self.sub.range_estimate()
    }

    fn resident_set(&self) -> Option<Arc<IdSet>> {
        self.sub.resident_set()
    }
}
