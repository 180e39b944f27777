// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Union of child iterators
//!
//! Each branch keeps its next id as a head; the union produces the earliest
//! head and advances every branch positioned on it. The heads are the call
//! state: a suspended `next` or `find` resumes from whatever heads are
//! already filled. A branch that fails is dropped; the union fails only
//! when every branch has failed.

use crate::budget::{ensure_budget, Budget, IterResult, Resume};
use crate::cache::CursorCaches;
use crate::cursor::{format_stats, FreezeFlags, Position};
use crate::error::IterError;
use crate::iter::{
    freeze_cursor, set_header, Direction, IdRange, IteratorKind, IteratorStats, SetIterator,
};
use crate::store::Id;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    Unknown,
    At(Id),
    Eof,
}

#[derive(Debug)]
struct Branch {
    iter: Option<Box<dyn SetIterator>>,
    head: Head,
}

/// Union of child iterators over the same range and direction
#[derive(Debug)]
pub struct UnionIterator {
    branches: Vec<Branch>,
    range: IdRange,
    direction: Direction,
    position: Position,
    // Set after thaw: reposition past `position` on the next call
    reseek: bool,
    // Suspended check: the id and the next branch to ask
    pending_check: Option<(Id, usize)>,
    // Suspended statistics: the next branch to ask
    pending_stats: Option<usize>,
    stats: Option<IteratorStats>,
    partial: IteratorStats,
    last_failure: Option<String>,
    original: bool,
}

impl UnionIterator {
    pub fn new(children: Vec<Box<dyn SetIterator>>, range: IdRange, direction: Direction) -> Self {
        Self {
            branches: children
                .into_iter()
                .map(|iter| Branch {
                    iter: Some(iter),
                    head: Head::Unknown,
                })
                .collect(),
            range,
            direction,
            position: Position::Start,
            reseek: false,
            pending_check: None,
            pending_stats: None,
            stats: None,
            partial: IteratorStats::default(),
            last_failure: None,
            original: true,
        }
    }

    pub(crate) fn resume_at(mut self, position: Position, stats: Option<IteratorStats>) -> Self {
        self.position = position;
        self.reseek = matches!(position, Position::At(_));
        self.stats = stats;
        self
    }

    pub fn branch_count(&self) -> usize {
        self.branches.iter().filter(|b| b.iter.is_some()).count()
    }

    fn fail_branch(&mut self, index: usize, error: IterError) -> Result<(), IterError> {
        log::warn!("Union branch {} failed: {}", index, error);
        self.last_failure = Some(error.to_string());
        let branch = &mut self.branches[index];
        branch.iter = None;
        branch.head = Head::Eof;
        if self.branch_count() == 0 {
            return Err(IterError::AllBranchesFailed {
                count: self.branches.len(),
                last: self.last_failure.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Fill heads at or past `target` (all unknown heads when `None`)
    fn fill_heads(&mut self, target: Option<Id>, budget: &mut Budget) -> IterResult<()> {
        for index in 0..self.branches.len() {
            let needs = match (self.branches[index].head, target) {
                (Head::Eof, _) => false,
                (Head::Unknown, _) => true,
                (Head::At(head), Some(target)) => self.direction.precedes(head, target),
                (Head::At(_), None) => false,
            };
            if !needs {
                continue;
            }
            ensure_budget!(budget);

            let outcome = match self.branches[index].iter.as_mut() {
                Some(iter) => match target {
                    Some(target) => iter.find(target, budget),
                    None => iter.next(budget),
                },
                None => continue,
            };
            match outcome {
                Ok(Resume::Done(Some(id))) => self.branches[index].head = Head::At(id),
                Ok(Resume::Done(None)) => self.branches[index].head = Head::Eof,
                Ok(Resume::Suspended) => return Ok(Resume::Suspended),
                Err(e) => self.fail_branch(index, e)?,
            }
        }
        Ok(Resume::Done(()))
    }

    fn earliest_head(&self) -> Option<Id> {
        let direction = self.direction;
        self.branches
            .iter()
            .filter_map(|b| match b.head {
                Head::At(id) => Some(id),
                _ => None,
            })
            .reduce(|a, b| if direction.precedes(b, a) { b } else { a })
    }

    /// Produce the earliest head and consume it from every branch
    fn take_earliest(&mut self) -> Option<Id> {
        let best = self.earliest_head();
        if let Some(best) = best {
            for branch in &mut self.branches {
                if branch.head == Head::At(best) {
                    branch.head = Head::Unknown;
                }
            }
        }
        self.position = best.map_or(Position::End, Position::At);
        best
    }

    fn seek(&mut self, target: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        match self.fill_heads(Some(target), budget)? {
            Resume::Done(()) => Ok(Resume::Done(self.take_earliest())),
            Resume::Suspended => Ok(Resume::Suspended),
        }
    }
}

impl SetIterator for UnionIterator {
    fn kind(&self) -> IteratorKind {
        IteratorKind::Union
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
        if self.position == Position::End {
            return Ok(Resume::Done(None));
        }
        if self.reseek {
            let target = match self.position.resume_from(self.range, self.direction) {
                Some(target) => target,
                None => {
                    self.position = Position::End;
                    return Ok(Resume::Done(None));
                }
            };
            let found = self.seek(target, budget)?;
            if !found.is_suspended() {
                self.reseek = false;
            }
            return Ok(found);
        }

        match self.fill_heads(None, budget)? {
            Resume::Done(()) => Ok(Resume::Done(self.take_earliest())),
            Resume::Suspended => Ok(Resume::Suspended),
        }
    }

    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        let target = match self.position.clamp_find(id, self.direction) {
            Some(target) => target,
            None => return Ok(Resume::Done(None)),
        };
        let found = self.seek(target, budget)?;
        if !found.is_suspended() {
            self.reseek = false;
        }
        Ok(found)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        if !self.range.contains(id) {
            return Ok(Resume::Done(false));
        }
        let mut next_branch = match self.pending_check.take() {
            Some((pending, next_branch)) if pending == id => next_branch,
            _ => 0,
        };

        while next_branch < self.branches.len() {
            if budget.is_exhausted() {
                self.pending_check = Some((id, next_branch));
                return Ok(Resume::Suspended);
            }
            let outcome = match self.branches[next_branch].iter.as_mut() {
                Some(iter) => iter.check(id, budget),
                None => Ok(Resume::Done(false)),
            };
            match outcome {
                Ok(Resume::Done(true)) => return Ok(Resume::Done(true)),
                Ok(Resume::Done(false)) => next_branch += 1,
                Ok(Resume::Suspended) => {
                    self.pending_check = Some((id, next_branch));
                    return Ok(Resume::Suspended);
                }
                Err(e) => {
                    self.fail_branch(next_branch, e)?;
                    next_branch += 1;
                }
            }
        }
        Ok(Resume::Done(false))
    }

    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats> {
        ensure_budget!(budget);
        if let Some(stats) = self.stats {
            return Ok(Resume::Done(stats));
        }
        let mut next_branch = match self.pending_stats.take() {
            Some(next_branch) => next_branch,
            None => {
                self.partial = IteratorStats::default();
                0
            }
        };

        while next_branch < self.branches.len() {
            let outcome = match self.branches[next_branch].iter.as_mut() {
                Some(iter) => iter.statistics(budget),
                None => {
                    next_branch += 1;
                    continue;
                }
            };
            match outcome {
                Ok(Resume::Done(child)) => {
                    self.partial.n += child.n;
                    self.partial.next_cost = self.partial.next_cost.max(child.next_cost);
                    self.partial.find_cost += child.find_cost;
                    self.partial.check_cost += child.check_cost;
                    next_branch += 1;
                }
                Ok(Resume::Suspended) => {
                    self.pending_stats = Some(next_branch);
                    return Ok(Resume::Suspended);
                }
                Err(e) => {
                    self.fail_branch(next_branch, e)?;
                    next_branch += 1;
                }
            }
        }

        let live = self.branch_count() as i64;
        let stats = IteratorStats {
            n: self.partial.n.min(self.range.len()),
            // Each produced id advances every branch positioned on it
            next_cost: self.partial.next_cost + live,
            find_cost: self.partial.find_cost,
            check_cost: self.partial.check_cost,
        };
        self.stats = Some(stats);
        Ok(Resume::Done(stats))
    }

    fn stats(&self) -> Option<IteratorStats> {
        self.stats
    }

    fn beyond(&mut self, value: &Value, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        let value = match value.as_id() {
            Some(value) => value,
            None => return Ok(Resume::Done(false)),
        };
        if self.position.beyond(value, self.range, self.direction) {
            return Ok(Resume::Done(true));
        }
        // Filled heads are kept, so the next call to `next` reuses them
        let target = if self.reseek {
            self.position.resume_from(self.range, self.direction)
        } else {
            None
        };
        match self.fill_heads(target, budget)? {
            Resume::Done(()) => Ok(Resume::Done(
                self.earliest_head()
                    .map_or(true, |head| self.direction.precedes(value, head)),
            )),
            Resume::Suspended => Ok(Resume::Suspended),
        }
    }

    fn reset(&mut self) -> Result<(), IterError> {
        for branch in &mut self.branches {
            if let Some(iter) = branch.iter.as_mut() {
                iter.reset()?;
                branch.head = Head::Unknown;
            }
        }
        self.position = Position::Start;
        self.reseek = false;
        self.pending_check = None;
        Ok(())
    }

    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError> {
        let mut branches = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            let iter = match &branch.iter {
                Some(iter) => Some(iter.clone_iter()?),
                None => None,
            };
            branches.push(Branch {
                iter,
                head: branch.head,
            });
        }
        Ok(Box::new(UnionIterator {
            branches,
            range: self.range,
            direction: self.direction,
            position: self.position,
            reseek: self.reseek,
            pending_check: None,
            pending_stats: None,
            stats: self.stats,
            partial: IteratorStats::default(),
            last_failure: self.last_failure.clone(),
            original: false,
        }))
    }

    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError> {
        let mut spec = format!(
            "{}:",
            set_header(IteratorKind::Union, self.direction, self.range)
        );
        for branch in &mut self.branches {
            if let Some(iter) = branch.iter.as_mut() {
                spec.push('(');
                spec.push_str(&iter.freeze(FreezeFlags::SET, caches)?);
                spec.push(')');
            }
        }
        let state = self.stats.as_ref().map(format_stats);
        Ok(freeze_cursor(spec, self.position, state, flags, caches))
    }
}
