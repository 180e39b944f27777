// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Word-prefix iterator
//!
//! Produces the primitives containing a word that starts with a prefix.
//! Prefixes shorter than the store's direct prefix length become a union
//! over the postings of every indexed completion; the union is assembled
//! one completion at a time so construction itself is budgeted. Longer
//! prefixes are a single direct index lookup.
//!
//! The built union lives in state shared by the original and its clones,
//! together with a cache of the first results and what each cost to
//! produce. Clones replay the cache; past its end they clone the union and
//! reposition with `find`. Check runs on a separate clone so it never
//! disturbs the iteration position. Beyond answers from the cache when it
//! can; otherwise it finishes the union and looks ahead on a private clone.

use crate::budget::{cost, ensure_budget, try_resume, Budget, IterResult, Resume};
use crate::cache::CursorCaches;
use crate::config::PrefixConfig;
use crate::cursor::{escape, format_stats, FreezeFlags, Position};
use crate::error::IterError;
use crate::iter::idset::IdSetIterator;
use crate::iter::union::UnionIterator;
use crate::iter::{
    freeze_cursor, set_header, Direction, IdRange, IteratorKind, IteratorStats, SetIterator,
    SharedLink,
};
use crate::store::{Id, IndexStore};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct CachedId {
    id: Id,
    cost: i64,
}

enum Build {
    Listing,
    Opening {
        keys: Vec<String>,
        next: usize,
        branches: Vec<Box<dyn SetIterator>>,
    },
    Built(Box<dyn SetIterator>),
}

enum CacheRead {
    Hit(Id),
    Exhausted,
    Overflow,
}

enum CacheLookup {
    Hit { index: usize, id: Id },
    Exhausted,
    Miss,
}

struct PrefixShared {
    store: Arc<dyn IndexStore>,
    prefix: String,
    range: IdRange,
    direction: Direction,
    build: Build,
    cache: Vec<CachedId>,
    cache_limit: usize,
    cache_source: Option<Box<dyn SetIterator>>,
    cache_complete: bool,
    stats: Option<IteratorStats>,
}

impl PrefixShared {
    fn build(&mut self, budget: &mut Budget) -> IterResult<()> {
        loop {
            if matches!(self.build, Build::Built(_)) {
                return Ok(Resume::Done(()));
            }
            ensure_budget!(budget);

            let state = std::mem::replace(&mut self.build, Build::Listing);
            self.build = match state {
                Build::Listing if self.prefix.chars().count() >= self.store.direct_prefix_len() => {
                    budget.charge(cost::POSTING_OPEN);
                    let key = format!("{}*", self.prefix);
                    let child = match self.store.word_postings(&key)? {
                        Some(postings) => {
                            IdSetIterator::from_postings(postings, self.range, self.direction)
                        }
                        None => IdSetIterator::empty(self.range, self.direction),
                    };
                    log::debug!("Prefix '{}' answered by direct key", self.prefix);
                    Build::Built(child.boxed())
                }
                Build::Listing => {
                    let keys = self.store.completions(&self.prefix)?;
                    budget.charge(cost::COMPLETION * (keys.len() as i64).max(1));
                    Build::Opening {
                        keys,
                        next: 0,
                        branches: Vec::new(),
                    }
                }
                Build::Opening {
                    keys,
                    next,
                    mut branches,
                } => {
                    if next == keys.len() {
                        log::debug!(
                            "Prefix '{}' built as a union of {} completions",
                            self.prefix,
                            branches.len()
                        );
                        Build::Built(
                            UnionIterator::new(branches, self.range, self.direction).boxed(),
                        )
                    } else {
                        budget.charge(cost::POSTING_OPEN);
                        if let Some(postings) = self.store.word_postings(&keys[next])? {
                            branches.push(
                                IdSetIterator::from_postings(postings, self.range, self.direction)
                                    .boxed(),
                            );
                        }
                        Build::Opening {
                            keys,
                            next: next + 1,
                            branches,
                        }
                    }
                }
                built @ Build::Built(_) => built,
            };
        }
    }

    fn built_mut(&mut self) -> Result<&mut Box<dyn SetIterator>, IterError> {
        match &mut self.build {
            Build::Built(union) => Ok(union),
            _ => Err(IterError::storage(format!(
                "prefix '{}' used before its union was built",
                self.prefix
            ))),
        }
    }

    fn read(&mut self, offset: usize, budget: &mut Budget) -> IterResult<CacheRead> {
        if let Some(entry) = self.cache.get(offset) {
            budget.charge(entry.cost.max(cost::CACHE_READ));
            return Ok(Resume::Done(CacheRead::Hit(entry.id)));
        }
        if self.cache_complete {
            return Ok(Resume::Done(CacheRead::Exhausted));
        }
        if offset >= self.cache_limit || offset > self.cache.len() {
            return Ok(Resume::Done(CacheRead::Overflow));
        }

        try_resume!(self.build(budget));
        if self.cache_source.is_none() {
            let source = self.built_mut()?.clone_iter()?;
            self.cache_source = Some(source);
        }
        let before = budget.spent();
        let produced = match self.cache_source.as_mut() {
            Some(source) => try_resume!(source.next(budget)),
            None => None,
        };
        match produced {
            Some(id) => {
                self.cache.push(CachedId {
                    id,
                    cost: budget.spent() - before,
                });
                if self.cache.len() >= self.cache_limit {
                    self.cache_source = None;
                }
                Ok(Resume::Done(CacheRead::Hit(id)))
            }
            None => {
                self.cache_complete = true;
                self.cache_source = None;
                Ok(Resume::Done(CacheRead::Exhausted))
            }
        }
    }

    fn lookup(&self, target: Id) -> CacheLookup {
        let direction = self.direction;
        let index = self
            .cache
            .partition_point(|entry| direction.precedes(entry.id, target));
        match self.cache.get(index) {
            Some(entry) => CacheLookup::Hit {
                index,
                id: entry.id,
            },
            None if self.cache_complete => CacheLookup::Exhausted,
            None => CacheLookup::Miss,
        }
    }
}

enum Scan {
    /// Replaying the shared cache
    Cached { offset: usize },
    /// Repositioning a private union clone on `target`
    Seeking {
        union: Option<Box<dyn SetIterator>>,
        target: Id,
    },
    /// Iterating a private union clone
    Union(Box<dyn SetIterator>),
    Done,
}

/// Where `beyond` found (or is looking for) the next id to produce
enum Lookahead {
    Seeking {
        target: Id,
        union: Box<dyn SetIterator>,
    },
    Found {
        target: Id,
        next: Option<Id>,
    },
}

/// Iterator over primitives containing a word with a given prefix
pub struct PrefixIterator {
    link: SharedLink<PrefixShared>,
    prefix: String,
    range: IdRange,
    direction: Direction,
    scan: Scan,
    position: Position,
    checker: Option<Box<dyn SetIterator>>,
    lookahead: Option<Lookahead>,
    stats: Option<IteratorStats>,
}

impl PrefixIterator {
    /// `prefix` must already be in the store's normalized word form
    pub fn new(
        store: Arc<dyn IndexStore>,
        prefix: &str,
        range: IdRange,
        direction: Direction,
        config: &PrefixConfig,
    ) -> Self {
        Self {
            link: SharedLink::new(PrefixShared {
                store,
                prefix: prefix.to_string(),
                range,
                direction,
                build: Build::Listing,
                cache: Vec::new(),
                cache_limit: config.cache_size,
                cache_source: None,
                cache_complete: false,
                stats: None,
            }),
            prefix: prefix.to_string(),
            range,
            direction,
            scan: Scan::Cached { offset: 0 },
            position: Position::Start,
            checker: None,
            lookahead: None,
            stats: None,
        }
    }

    /// Continue after a thawed position
    pub(crate) fn resume_at(mut self, position: Position, stats: Option<IteratorStats>) -> Self {
        self.position = position;
        self.scan = match position {
            Position::Start => Scan::Cached { offset: 0 },
            Position::End => Scan::Done,
            Position::At(_) => match position.resume_from(self.range, self.direction) {
                Some(target) => Scan::Seeking {
                    union: None,
                    target,
                },
                None => Scan::Done,
            },
        };
        if let Some(stats) = stats {
            self.stats = Some(stats);
            if let Ok(shared) = self.link.get() {
                shared.borrow_mut().stats = Some(stats);
            }
        }
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of results held in the shared cache
    pub fn cached_len(&self) -> usize {
        self.link.get().map_or(0, |shared| shared.borrow().cache.len())
    }

    fn fresh_union(&self, budget: &mut Budget) -> IterResult<Box<dyn SetIterator>> {
        let shared = self.link.get()?;
        let mut shared = shared.borrow_mut();
        try_resume!(shared.build(budget));
        Ok(Resume::Done(shared.built_mut()?.clone_iter()?))
    }

    fn read_cache(&self, offset: usize, budget: &mut Budget) -> IterResult<CacheRead> {
        let shared = self.link.get()?;
        let result = shared.borrow_mut().read(offset, budget);
        result
    }

    fn settle(&mut self, union: Box<dyn SetIterator>, found: Option<Id>) -> IterResult<Option<Id>> {
        self.scan = match found {
            Some(_) => Scan::Union(union),
            None => Scan::Done,
        };
        self.position = found.map_or(Position::End, Position::At);
        Ok(Resume::Done(found))
    }

    fn run_seek(
        &mut self,
        target: Id,
        pending: Option<Box<dyn SetIterator>>,
        budget: &mut Budget,
    ) -> IterResult<Option<Id>> {
        self.scan = Scan::Seeking {
            union: None,
            target,
        };
        let mut union = match pending {
            Some(union) => union,
            None => try_resume!(self.fresh_union(budget)),
        };
        match union.find(target, budget) {
            Ok(Resume::Done(found)) => self.settle(union, found),
            Ok(Resume::Suspended) => {
                self.scan = Scan::Seeking {
                    union: Some(union),
                    target,
                };
                Ok(Resume::Suspended)
            }
            Err(e) => Err(e),
        }
    }

    /// The next id `next` would produce, found without moving
    fn peek(&mut self, budget: &mut Budget) -> IterResult<Option<Id>> {
        let target = match &self.scan {
            Scan::Done => return Ok(Resume::Done(None)),
            Scan::Seeking { target, .. } => *target,
            _ => match self.position.resume_from(self.range, self.direction) {
                Some(target) => target,
                None => return Ok(Resume::Done(None)),
            },
        };
        if let Scan::Cached { offset } = self.scan {
            let shared = self.link.get()?;
            let shared = shared.borrow();
            if let Some(entry) = shared.cache.get(offset) {
                budget.charge(cost::CACHE_READ);
                return Ok(Resume::Done(Some(entry.id)));
            }
            if shared.cache_complete {
                return Ok(Resume::Done(None));
            }
        }

        let mut union = match self.lookahead.take() {
            Some(Lookahead::Found { target: known, next }) if known == target => {
                self.lookahead = Some(Lookahead::Found { target, next });
                return Ok(Resume::Done(next));
            }
            Some(Lookahead::Seeking {
                target: pending,
                union,
            }) if pending == target => union,
            _ => try_resume!(self.fresh_union(budget)),
        };
        match union.find(target, budget)? {
            Resume::Done(next) => {
                self.lookahead = Some(Lookahead::Found { target, next });
                Ok(Resume::Done(next))
            }
            Resume::Suspended => {
                self.lookahead = Some(Lookahead::Seeking { target, union });
                Ok(Resume::Suspended)
            }
        }
    }

    fn finish(&mut self) -> IterResult<Option<Id>> {
        self.scan = Scan::Done;
        self.position = Position::End;
        Ok(Resume::Done(None))
    }
}

impl fmt::Debug for PrefixIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scan = match &self.scan {
            Scan::Cached { offset } => format!("cached@{}", offset),
            Scan::Seeking { target, .. } => format!("seeking {}", target),
            Scan::Union(_) => "union".to_string(),
            Scan::Done => "done".to_string(),
        };
        f.debug_struct("PrefixIterator")
            .field("prefix", &self.prefix)
            .field("range", &self.range)
            .field("direction", &self.direction)
            .field("position", &self.position)
            .field("scan", &scan)
            .finish()
    }
}

impl SetIterator for PrefixIterator {
    fn kind(&self) -> IteratorKind {
        IteratorKind::Prefix
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
        match std::mem::replace(&mut self.scan, Scan::Done) {
            Scan::Done => self.finish(),
            Scan::Cached { offset } => match self.read_cache(offset, budget) {
                Ok(Resume::Done(CacheRead::Hit(id))) => {
                    self.scan = Scan::Cached { offset: offset + 1 };
                    self.position = Position::At(id);
                    Ok(Resume::Done(Some(id)))
                }
                Ok(Resume::Done(CacheRead::Exhausted)) => self.finish(),
                Ok(Resume::Done(CacheRead::Overflow)) => {
                    match self.position.resume_from(self.range, self.direction) {
                        Some(target) => self.run_seek(target, None, budget),
                        None => self.finish(),
                    }
                }
                Ok(Resume::Suspended) => {
                    self.scan = Scan::Cached { offset };
                    Ok(Resume::Suspended)
                }
                Err(e) => {
                    self.scan = Scan::Cached { offset };
                    Err(e)
                }
            },
            Scan::Seeking { union, target } => self.run_seek(target, union, budget),
            Scan::Union(mut union) => match union.next(budget) {
                Ok(Resume::Done(found)) => self.settle(union, found),
                other => {
                    self.scan = Scan::Union(union);
                    other
                }
            },
        }
    }

    fn find(&mut self, id: Id, budget: &mut Budget) -> IterResult<Option<Id>> {
        ensure_budget!(budget);
        let target = match self.position.clamp_find(id, self.direction) {
            Some(target) => target,
            None => return Ok(Resume::Done(None)),
        };
        match std::mem::replace(&mut self.scan, Scan::Done) {
            Scan::Done => self.finish(),
            Scan::Cached { offset } => {
                let lookup = match self.link.get() {
                    Ok(shared) => {
                        let lookup = shared.borrow().lookup(target);
                        lookup
                    }
                    Err(e) => {
                        self.scan = Scan::Cached { offset };
                        return Err(e);
                    }
                };
                match lookup {
                    CacheLookup::Hit { index, id } => {
                        budget.charge(cost::CACHE_READ);
                        self.scan = Scan::Cached { offset: index + 1 };
                        self.position = Position::At(id);
                        Ok(Resume::Done(Some(id)))
                    }
                    CacheLookup::Exhausted => self.finish(),
                    CacheLookup::Miss => self.run_seek(target, None, budget),
                }
            }
            Scan::Seeking {
                union,
                target: pending,
            } => {
                // A pending seek already skipped ids before its target
                let union = if self.direction.precedes(target, pending) {
                    None
                } else {
                    union
                };
                self.run_seek(target, union, budget)
            }
            Scan::Union(mut union) => match union.find(target, budget) {
                Ok(Resume::Done(found)) => self.settle(union, found),
                other => {
                    self.scan = Scan::Union(union);
                    other
                }
            },
        }
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> IterResult<bool> {
        ensure_budget!(budget);
        if !self.range.contains(id) {
            return Ok(Resume::Done(false));
        }

        let complete_cache = {
            let shared = self.link.get()?;
            let shared = shared.borrow();
            if shared.cache_complete {
                Some(shared.cache.iter().any(|entry| entry.id == id))
            } else {
                None
            }
        };
        if let Some(found) = complete_cache {
            budget.charge(cost::CACHE_READ);
            return Ok(Resume::Done(found));
        }

        if self.checker.is_none() {
            let checker = try_resume!(self.fresh_union(budget));
            self.checker = Some(checker);
        }
        match self.checker.as_mut() {
            Some(checker) => checker.check(id, budget),
            None => Ok(Resume::Done(false)),
        }
    }

    fn statistics(&mut self, budget: &mut Budget) -> IterResult<IteratorStats> {
        ensure_budget!(budget);
        if let Some(stats) = self.stats {
            return Ok(Resume::Done(stats));
        }

        let shared = self.link.get()?;
        let mut shared = shared.borrow_mut();
        let stats = match shared.stats {
            Some(stats) => stats,
            None => {
                try_resume!(shared.build(budget));
                let stats = try_resume!(shared.built_mut()?.statistics(budget));
                shared.stats = Some(stats);
                stats
            }
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
        if let Scan::Union(union) = &mut self.scan {
            return union.beyond(&Value::Id(value), budget);
        }
        let next = try_resume!(self.peek(budget));
        Ok(Resume::Done(
            next.map_or(true, |next| self.direction.precedes(value, next)),
        ))
    }

    fn reset(&mut self) -> Result<(), IterError> {
        self.scan = Scan::Cached { offset: 0 };
        self.position = Position::Start;
        self.lookahead = None;
        Ok(())
    }

    fn clone_iter(&self) -> Result<Box<dyn SetIterator>, IterError> {
        self.link.get()?;
        let scan = match &self.scan {
            Scan::Cached { offset } => Scan::Cached { offset: *offset },
            Scan::Seeking { target, .. } => Scan::Seeking {
                union: None,
                target: *target,
            },
            Scan::Union(union) => Scan::Union(union.clone_iter()?),
            Scan::Done => Scan::Done,
        };
        Ok(Box::new(PrefixIterator {
            link: self.link.clone_link(),
            prefix: self.prefix.clone(),
            range: self.range,
            direction: self.direction,
            scan,
            position: self.position,
            checker: None,
            lookahead: None,
            stats: self.stats,
        }))
    }

    fn freeze(&mut self, flags: FreezeFlags, caches: &CursorCaches) -> Result<String, IterError> {
        let spec = format!(
            "{}:{}",
            set_header(IteratorKind::Prefix, self.direction, self.range),
            escape(&self.prefix)
        );
        let stats = self
            .stats
            .or_else(|| self.link.get().ok().and_then(|s| s.borrow().stats));
        let state = stats.as_ref().map(format_stats);
        Ok(freeze_cursor(spec, self.position, state, flags, caches))
    }
}
