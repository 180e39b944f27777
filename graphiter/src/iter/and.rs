// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Intersection of child iterators by leapfrogging `find` calls

use crate::budget::{ensure_budget, Budget, IterResult, Resume};
use crate::cache::CursorCaches;
use crate::cursor::{format_stats, FreezeFlags, Position};
use crate::error::IterError;
use crate::iter::{
    freeze_cursor, set_header, Direction, IdRange, IteratorKind, IteratorStats, PrimitiveSummary,
    SetIterator,
};
use crate::store::Id;

/// Suspended leapfrog: `matched` consecutive children agree on `target`;
/// `index` is asked next. No common member lies before `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Seek {
    target: Id,
    matched: usize,
    index: usize,
}

/// Intersection of child iterators over the same range and direction
#[derive(Debug)]
pub struct AndIterator {
    children: Vec<Box<dyn SetIterator>>,
    range: IdRange,
    direction: Direction,
    position: Position,
    seek: Option<Seek>,
    // Suspended check: the id and the next child to ask
    pending_check: Option<(Id, usize)>,
    // Suspended statistics: the next child to ask
    pending_stats: Option<usize>,
    stats: Option<IteratorStats>,
    partial: IteratorStats,
    original: bool,
}

impl AndIterator {
    /// Intersect `children`, dropping any child whose set is implied by a
    /// sibling's primitive summary
    pub fn new(
        children: Vec<Box<dyn SetIterator>>,
        range: IdRange,
        direction: Direction,
    ) -> Result<Self, IterError> {
        if children.is_empty() {
            return Err(IterError::impossible("intersection of no sets"));
        }

        let summaries: Vec<Option<PrimitiveSummary>> =
            children.iter().map(|c| c.primitive_summary()).collect();
        let mut keep = vec![true; children.len()];
        for j in 0..children.len() {
            let redundant = (0..children.len()).any(|i| {
                i != j
                    && keep[i]
                    && match (&summaries[i], &summaries[j]) {
                        (Some(si), Some(sj)) => si.implies(sj) && (si != sj || i < j),
                        _ => false,
                    }
            });
            if redundant {
                log::debug!("Dropping intersection child {} implied by a sibling", j);
                keep[j] = false;
            }
        }
        let children: Vec<_> = children
            .into_iter()
            .zip(keep)
            .filter_map(|(child, keep)| keep.then_some(child))
            .collect();

        Ok(Self {
            children,
            range,
            direction,
            position: Position::Start,
            seek: None,
            pending_check: None,
            pending_stats: None,
            stats: None,
            partial: IteratorStats::default(),
            original: true,
        })
    }

    pub(crate) fn resume_at(mut self, position: Position, stats: Option<IteratorStats>) -> Self {
        self.position = position;
        self.stats = stats;
        self
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn leapfrog(&mut self, wanted: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        let (mut target, mut matched, mut index) = match self.seek.take() {
            Some(Seek {
                target,
                matched,
                index,
            }) if !self.direction.precedes(target, wanted) => (target, matched, index),
            _ => (wanted, 0, 0),
        };
        let n = self.children.len();

        loop {
            if matched == n {
                self.position = Position::At(target);
                return Ok(Resume::Done(Some(target)));
            }
            if budget.is_exhausted() {
                self.seek = Some(Seek {
                    target,
                    matched,
                    index,
                });
                return Ok(Resume::Suspended);
            }
            match self.children[index].find(target, budget) {
                Ok(Resume::Done(Some(id))) => {
                    if id == target {
                        matched += 1;
                    } else {
                        target = id;
                        matched = 1;
                    }
                    index = (index + 1) % n;
                }
                Ok(Resume::Done(None)) => {
                    self.position = Position::End;
                    return Ok(Resume::Done(None));
                }
                Ok(Resume::Suspended) => {
                    self.seek = Some(Seek {
                        target,
                        matched,
                        index,
                    });
                    return Ok(Resume::Suspended);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl SetIterator for AndIterator {
    fn kind(&self) -> IteratorKind {
        IteratorKind::And
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
        self.original
    }

    fn next(&mut self, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        match self.position.resume_from(self.range, self.direction) {
            Some(target) => self.leapfrog(target, budget),
            None => {
                self.position = Position::End;
                Ok(Resume::Done(None))
            }
        }
    }

    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        let target = match self.position.clamp_find(id, self.direction) {
            Some(target) => target,
            None => return Ok(Resume::Done(None)),
        };
        if !self.range.contains(target) {
            let past_end = match self.direction {
                Direction::Forward => target >= self.range.high,
                Direction::Backward => target < self.range.low,
            };
            if past_end {
                self.position = Position::End;
                return Ok(Resume::Done(None));
            }
        }
        self.leapfrog(target, budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        if !self.range.contains(id) {
            return Ok(Resume::Done(false));
        }
        let mut next_child = match self.pending_check.take() {
            Some((pending, next_child)) if pending == id => next_child,
            _ => 0,
        };
        while next_child < self.children.len() {
            match self.children[next_child].check(id, budget)? {
                Resume::Done(true) => next_child += 1,
                Resume::Done(false) => return Ok(Resume::Done(false)),
                Resume::Suspended => {
                    self.pending_check = Some((id, next_child));
                    return Ok(Resume::Suspended);
                }
            }
        }
        Ok(Resume::Done(true))
    }

    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats> {
        ensure_budget!(budget);
        if let Some(stats) = self.stats {
            return Ok(Resume::Done(stats));
        }
        let mut next_child = match self.pending_stats.take() {
            Some(next_child) => next_child,
            None => {
                self.partial = IteratorStats {
                    n: u64::MAX,
                    ..IteratorStats::default()
                };
                0
            }
        };
        while next_child < self.children.len() {
            match self.children[next_child].statistics(budget)? {
                Resume::Done(child) => {
                    self.partial.n = self.partial.n.min(child.n);
                    self.partial.find_cost += child.find_cost;
                    self.partial.check_cost += child.check_cost;
                    next_child += 1;
                }
                Resume::Suspended => {
                    self.pending_stats = Some(next_child);
                    return Ok(Resume::Suspended);
                }
            }
        }

        // Smallest child first: it proposes the fewest targets. A pending
        // seek counts agreement by child order, so it pins the order.
        if self.seek.is_none() {
            self.children
                .sort_by_key(|c| c.stats().map_or(u64::MAX, |s| s.n));
        }

        let stats = IteratorStats {
            n: self.partial.n.min(self.range.len()),
            next_cost: self.partial.find_cost,
            find_cost: self.partial.find_cost,
            check_cost: self.partial.check_cost,
        };
        self.stats = Some(stats);
        Ok(Resume::Done(stats))
    }

    fn stats(&self) -> Option<IteratorStats> {
        self.stats
    }

    fn reset(&mut self) -> Result<(), IterError> {
        for child in &mut self.children {
            child.reset()?;
        }
        self.position = Position::Start;
        self.seek = None;
        self.pending_check = None;
        Ok(())
    }

    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError> {
        let children = self
            .children
            .iter()
            .map(|c| c.clone_iter())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(AndIterator {
            children,
            range: self.range,
            direction: self.direction,
            position: self.position,
            seek: None,
            pending_check: None,
            pending_stats: None,
            stats: self.stats,
            partial: IteratorStats::default(),
            original: false,
        }))
    }

    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError> {
        let mut spec = format!(
            "{}:",
            set_header(IteratorKind::And, self.direction, self.range)
        );
        for child in &mut self.children {
            spec.push('(');
            spec.push_str(&child.freeze(FreezeFlags::SET, caches)?);
            spec.push(')');
        }
        let state = self.stats.as_ref().map(format_stats);
        Ok(freeze_cursor(spec, self.position, state, flags, caches))
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        let mut linkages = Vec::new();
        for child in &self.children {
            if let Some(summary) = child.primitive_summary() {
                for linkage in summary.linkages {
                    if !linkages.contains(&linkage) {
                        linkages.push(linkage);
                    }
                }
            }
        }
        if linkages.is_empty() {
            None
        } else {
            Some(PrimitiveSummary {
                linkages,
                complete: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::idset::{IdSet, IdSetIterator};
    use crate::store::Linkage;
    use std::sync::Arc;

    fn set(ids: &[Id], direction: Direction) -> Box<dyn SetIterator> {
        IdSetIterator::new(
            Arc::new(IdSet::new(ids.to_vec())),
            IdRange::up_to(100),
            direction,
        )
        .boxed()
    }

    fn drain(iter: &mut dyn SetIterator) -> Vec<Id> {
        let mut out = Vec::new();
        let mut budget = Budget::new(10_000);
        while let Resume::Done(Some(id)) = iter.next(&mut budget).unwrap() {
            out.push(id);
        }
        out
    }

    #[test]
    fn test_intersection_forward_and_backward() {
        let mut and = AndIterator::new(
            vec![
                set(&[1, 3, 5, 7, 9], Direction::Forward),
                set(&[3, 4, 5, 9], Direction::Forward),
                set(&[0, 3, 9, 11], Direction::Forward),
            ],
            IdRange::up_to(100),
            Direction::Forward,
        )
        .unwrap();
        assert_eq!(drain(&mut and), vec![3, 9]);

        let mut and = AndIterator::new(
            vec![
                set(&[1, 3, 5, 7, 9], Direction::Backward),
                set(&[3, 4, 5, 9], Direction::Backward),
            ],
            IdRange::up_to(100),
            Direction::Backward,
        )
        .unwrap();
        assert_eq!(drain(&mut and), vec![9, 5, 3]);
    }

    #[test]
    fn test_suspended_seek_resumes() {
        let mut and = AndIterator::new(
            vec![
                set(&(0..50).map(|i| i * 2).collect::<Vec<_>>(), Direction::Forward),
                set(&(0..30).map(|i| i * 3).collect::<Vec<_>>(), Direction::Forward),
            ],
            IdRange::up_to(100),
            Direction::Forward,
        )
        .unwrap();

        let mut produced = Vec::new();
        loop {
            let mut budget = Budget::new(3);
            match and.next(&mut budget).unwrap() {
                Resume::Done(Some(id)) => produced.push(id),
                Resume::Done(None) => break,
                Resume::Suspended => continue,
            }
        }
        let expected: Vec<Id> = (0..100).filter(|i| i % 6 == 0 && *i < 87).collect();
        assert_eq!(produced, expected);
    }

    #[test]
    fn test_check_and_statistics_leave_a_suspended_seek_alone() {
        let mut and = AndIterator::new(
            vec![
                set(&[5, 10], Direction::Forward),
                set(&[5, 10], Direction::Forward),
            ],
            IdRange::up_to(100),
            Direction::Forward,
        )
        .unwrap();
        let mut budget = Budget::new(1_000);

        assert_eq!(and.next(&mut Budget::new(2)).unwrap(), Resume::Suspended);
        assert_eq!(and.check(10, &mut budget).unwrap(), Resume::Done(true));
        assert_eq!(and.position(), Position::Start);
        assert_eq!(and.next(&mut budget).unwrap(), Resume::Done(Some(5)));

        assert_eq!(and.next(&mut Budget::new(2)).unwrap(), Resume::Suspended);
        assert!(and.statistics(&mut budget).unwrap().done().is_some());
        assert_eq!(and.next(&mut budget).unwrap(), Resume::Done(Some(10)));
        assert_eq!(and.next(&mut budget).unwrap(), Resume::Done(None));
    }

    #[test]
    fn test_check_requires_all_children() {
        let mut and = AndIterator::new(
            vec![set(&[1, 2, 3], Direction::Forward), set(&[2, 3], Direction::Forward)],
            IdRange::up_to(100),
            Direction::Forward,
        )
        .unwrap();
        let mut budget = Budget::new(100);
        assert_eq!(and.check(1, &mut budget).unwrap(), Resume::Done(false));
        assert_eq!(and.check(3, &mut budget).unwrap(), Resume::Done(true));
    }

    #[test]
    fn test_statistics_take_minimum() {
        let mut and = AndIterator::new(
            vec![set(&[1, 2, 3, 4], Direction::Forward), set(&[2, 3], Direction::Forward)],
            IdRange::up_to(100),
            Direction::Forward,
        )
        .unwrap();
        let stats = and.statistics(&mut Budget::new(100)).unwrap().done().unwrap();
        assert_eq!(stats.n, 2);
        assert_eq!(drain(&mut and), vec![2, 3]);
    }

    #[test]
    fn test_implied_child_is_dropped() {
        let narrow = PrimitiveSummary {
            linkages: vec![(Linkage::Left, 1), (Linkage::Type, 7)],
            complete: true,
        };
        let wide = PrimitiveSummary {
            linkages: vec![(Linkage::Type, 7)],
            complete: true,
        };
        let a = IdSetIterator::new(
            Arc::new(IdSet::new(vec![2, 4])),
            IdRange::up_to(100),
            Direction::Forward,
        )
        .with_summary(narrow)
        .boxed();
        let b = IdSetIterator::new(
            Arc::new(IdSet::new(vec![2, 4, 6])),
            IdRange::up_to(100),
            Direction::Forward,
        )
        .with_summary(wide)
        .boxed();

        let mut and = AndIterator::new(vec![a, b], IdRange::up_to(100), Direction::Forward).unwrap();
        assert_eq!(and.child_count(), 1);
        assert_eq!(drain(&mut and), vec![2, 4]);
    }

    #[test]
    fn test_empty_intersection_is_rejected() {
        let err = AndIterator::new(Vec::new(), IdRange::up_to(10), Direction::Forward).unwrap_err();
        assert!(err.is_semantic());
    }
}
