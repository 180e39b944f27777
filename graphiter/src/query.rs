// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Paged query driver
//!
//! [`PagedQuery`] pulls ids from a compiled iterator one scheduler turn at a
//! time. Without sort keys the page is the next `page_size` ids and the
//! continuation is the frozen iterator. With sort keys every id passes
//! through the [`IncrementalSort`] (prefilter, projection, accept, condense)
//! and the continuation is the sort cursor.
//!
//! Semantic failures (bad cursor, impossible constraint) produce an empty
//! page; system failures abort the query.

use crate::budget::{cost, try_resume, Budget, IterResult, Resume};
use crate::cursor::FreezeFlags;
use crate::env::EvalEnv;
use crate::error::IterError;
use crate::iter::{thaw, SetIterator, ID_ORDER};
use crate::sort::{Admission, IncrementalSort, Prefilter, SortCursor, SortKey, SortStats};
use crate::store::{Id, IndexStore, Linkage, Primitive};
use crate::value::Value;
use std::sync::Arc;

/// What to fetch
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub page_size: usize,
    /// Rows skipped before the page starts
    pub start: usize,
    pub sort: Vec<SortKey>,
    /// Continuation from a previous page: a sort cursor for sorted queries,
    /// an iterator cursor otherwise
    pub cursor: Option<String>,
}

impl QuerySpec {
    pub fn page(page_size: usize) -> Self {
        Self {
            page_size,
            ..Default::default()
        }
    }

    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Turns ids into result rows and sort-key values
pub trait Projector {
    type Row;

    /// Key values known without a full projection; `None` where unknown
    fn header(&self, id: Id, keys: &[SortKey]) -> Vec<Option<Value>>;

    /// Project a row and its key values, which may still be deferred.
    /// `None` if the id no longer names a row.
    fn project(
        &self,
        id: Id,
        keys: &[SortKey],
        budget: &mut Budget,
    ) -> Result<Option<(Self::Row, Vec<Value>)>, IterError>;

    /// Compute the deferred values among `values`
    fn resolve(
        &self,
        id: Id,
        keys: &[SortKey],
        values: Vec<Value>,
        budget: &mut Budget,
    ) -> Result<Vec<Value>, IterError>;
}

/// Projects primitives read from the store
///
/// Fields: `id`, `name`, `value`, `type`, `left`, `right`, `scope`, `live`.
/// Only `id` is known from the header. `value` bodies are loaded on demand:
/// projection defers them and [`resolve`](Projector::resolve) reads them.
#[derive(Clone)]
pub struct PrimitiveProjector {
    store: Arc<dyn IndexStore>,
}

impl PrimitiveProjector {
    pub fn new(env: &EvalEnv) -> Self {
        Self {
            store: env.store.clone(),
        }
    }

    fn read(&self, id: Id, budget: &mut Budget) -> Result<Option<Primitive>, IterError> {
        budget.charge(cost::PRIMITIVE_READ);
        Ok(self.store.read_primitive(id)?)
    }

    /// Value of a field; `value` is numeric when it parses as a number
    pub fn field(primitive: &Primitive, field: &str) -> Value {
        let id = |link: Option<Id>| link.map(Value::Id).unwrap_or(Value::Null);
        match field {
            ID_ORDER => Value::Id(primitive.id),
            "name" => primitive.name.clone().map(Value::Text).unwrap_or(Value::Null),
            "value" => match &primitive.value {
                Some(text) => text
                    .parse::<f64>()
                    .map(Value::Number)
                    .unwrap_or_else(|_| Value::Text(text.clone())),
                None => Value::Null,
            },
            "live" => Value::Bool(primitive.live),
            other => match Linkage::parse(other) {
                Some(role) => id(primitive.linkage(role)),
                None => Value::Null,
            },
        }
    }
}

impl Projector for PrimitiveProjector {
    type Row = Primitive;

    fn header(&self, id: Id, keys: &[SortKey]) -> Vec<Option<Value>> {
        keys.iter()
            .map(|key| (key.field == ID_ORDER).then_some(Value::Id(id)))
            .collect()
    }

    fn project(
        &self,
        id: Id,
        keys: &[SortKey],
        budget: &mut Budget,
    ) -> Result<Option<(Primitive, Vec<Value>)>, IterError> {
        let Some(primitive) = self.read(id, budget)? else {
            return Ok(None);
        };
        let values = keys
            .iter()
            .map(|key| match key.field.as_str() {
                "value" => Value::Deferred,
                field => Self::field(&primitive, field),
            })
            .collect();
        Ok(Some((primitive, values)))
    }

    fn resolve(
        &self,
        id: Id,
        keys: &[SortKey],
        values: Vec<Value>,
        budget: &mut Budget,
    ) -> Result<Vec<Value>, IterError> {
        let primitive = self
            .read(id, budget)?
            .ok_or_else(|| IterError::storage(format!("primitive {} vanished during projection", id)))?;
        Ok(keys
            .iter()
            .zip(values)
            .map(|(key, value)| {
                if value.is_deferred() {
                    Self::field(&primitive, &key.field)
                } else {
                    value
                }
            })
            .collect())
    }
}

/// One result row
#[derive(Debug, Clone)]
pub struct PageRow<R> {
    pub id: Id,
    /// Sort-key values; empty for unsorted queries
    pub keys: Vec<Value>,
    pub row: R,
}

/// A finished page
#[derive(Debug, Clone)]
pub struct Page<R> {
    pub rows: Vec<PageRow<R>>,
    /// Continuation for the next page; `None` after the last page
    pub cursor: Option<String>,
    /// Scheduler turns the page took
    pub turns: usize,
    pub sort_stats: Option<SortStats>,
}

impl<R> Page<R> {
    fn empty(turns: usize) -> Self {
        Self {
            rows: Vec::new(),
            cursor: None,
            turns,
            sort_stats: None,
        }
    }

    pub fn ids(&self) -> Vec<Id> {
        self.rows.iter().map(|row| row.id).collect()
    }
}

enum Step {
    Pull,
    Prefilter { id: Id, arrival: u64 },
    Condense,
    Finish,
}

enum Mode<R> {
    Unsorted { skipped: usize, rows: Vec<PageRow<R>> },
    Sorted {
        sort: IncrementalSort<R>,
        step: Step,
        arrivals: u64,
    },
    /// Nothing to fetch: the continuation said so or the query was invalid
    Empty,
    Done,
}

/// A query producing one page over as many turns as it needs
pub struct PagedQuery<P: Projector> {
    iter: Box<dyn SetIterator>,
    spec: QuerySpec,
    projector: P,
    env: EvalEnv,
    mode: Mode<P::Row>,
    turns: usize,
}

impl<P: Projector> PagedQuery<P> {
    /// Prepare a query over `iter`
    ///
    /// An iterator cursor in `spec` replaces `iter`. Semantic problems with
    /// the spec make the query produce an empty page.
    pub fn new(
        iter: Box<dyn SetIterator>,
        spec: QuerySpec,
        projector: P,
        env: &EvalEnv,
    ) -> Result<Self, IterError> {
        let mut query = Self {
            iter,
            spec,
            projector,
            env: env.clone(),
            mode: Mode::Empty,
            turns: 0,
        };
        match query.prepare() {
            Ok(mode) => query.mode = mode,
            Err(e) if e.is_semantic() => {
                log::debug!("Query yields an empty page: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(query)
    }

    fn prepare(&mut self) -> Result<Mode<P::Row>, IterError> {
        if self.spec.page_size == 0 {
            return Err(IterError::impossible("page size must be > 0"));
        }
        if self.spec.sort.is_empty() {
            if let Some(text) = &self.spec.cursor {
                self.iter = thaw(text, &self.env)?;
            }
            return Ok(Mode::Unsorted {
                skipped: 0,
                rows: Vec::new(),
            });
        }

        let cursor = match self.spec.cursor.as_deref() {
            Some(text) => match SortCursor::parse(text)? {
                Some(cursor) => Some(cursor),
                None => return Ok(Mode::Empty),
            },
            None => None,
        };
        let sort = IncrementalSort::new(
            self.spec.sort.clone(),
            self.spec.page_size,
            self.spec.start,
            &self.env.config.sort,
        )?
        .with_cursor(cursor)?
        .with_source_order(self.iter.as_ref());
        Ok(Mode::Sorted {
            sort,
            step: Step::Pull,
            arrivals: 0,
        })
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn iterator(&self) -> &dyn SetIterator {
        self.iter.as_ref()
    }

    /// Cursor of the source iterator where it currently stands
    pub fn freeze_source(&mut self, flags: FreezeFlags) -> Result<String, IterError> {
        self.iter.freeze(flags, &self.env.caches)
    }

    /// Advance by one turn; `Resume::Suspended` means "call again"
    pub fn run(&mut self, budget: &mut Budget) -> IterResult<Page<P::Row>> {
        self.turns += 1;
        if self.turns > self.env.config.query.max_turns {
            log::warn!("Query abandoned after {} turns", self.env.config.query.max_turns);
            self.mode = Mode::Done;
            return Ok(Resume::Done(Page::empty(self.turns)));
        }

        let result = match self.mode {
            Mode::Unsorted { .. } => self.run_unsorted(budget),
            Mode::Sorted { .. } => self.run_sorted(budget),
            Mode::Empty | Mode::Done => Ok(Resume::Done(Page::empty(self.turns))),
        };
        match result {
            Ok(Resume::Suspended) => Ok(Resume::Suspended),
            Ok(Resume::Done(page)) => {
                log::debug!(
                    "Query page complete: {} rows in {} turns, more: {}",
                    page.rows.len(),
                    page.turns,
                    page.cursor.is_some()
                );
                self.mode = Mode::Done;
                Ok(Resume::Done(page))
            }
            Err(e) if e.is_semantic() => {
                log::debug!("Query yields an empty page: {}", e);
                self.mode = Mode::Done;
                Ok(Resume::Done(Page::empty(self.turns)))
            }
            Err(e) => {
                log::warn!("Query aborted: {}", e);
                self.mode = Mode::Done;
                Err(e)
            }
        }
    }

    fn run_unsorted(&mut self, budget: &mut Budget) -> IterResult<Page<P::Row>> {
        let Mode::Unsorted { skipped, rows } = &mut self.mode else {
            return Ok(Resume::Done(Page::empty(self.turns)));
        };

        let mut exhausted = false;
        while rows.len() < self.spec.page_size {
            let Some(id) = try_resume!(self.iter.next(budget)) else {
                exhausted = true;
                break;
            };
            if *skipped < self.spec.start {
                *skipped += 1;
                continue;
            }
            if let Some((row, _)) = self.projector.project(id, &[], budget)? {
                rows.push(PageRow {
                    id,
                    keys: Vec::new(),
                    row,
                });
            }
        }

        let cursor = if exhausted {
            None
        } else {
            Some(self.iter.freeze(FreezeFlags::ALL, &self.env.caches)?)
        };
        Ok(Resume::Done(Page {
            rows: std::mem::take(rows),
            cursor,
            turns: self.turns,
            sort_stats: None,
        }))
    }

    fn run_sorted(&mut self, budget: &mut Budget) -> IterResult<Page<P::Row>> {
        let Mode::Sorted {
            sort,
            step,
            arrivals,
        } = &mut self.mode
        else {
            return Ok(Resume::Done(Page::empty(self.turns)));
        };

        loop {
            match *step {
                Step::Pull => {
                    if sort.needs_condense() {
                        *step = Step::Condense;
                        continue;
                    }
                    *step = match try_resume!(self.iter.next(budget)) {
                        Some(id) => {
                            *arrivals += 1;
                            Step::Prefilter {
                                id,
                                arrival: *arrivals - 1,
                            }
                        }
                        None => Step::Finish,
                    };
                }
                Step::Prefilter { id, arrival } => {
                    let header = self.projector.header(id, sort.keys());
                    let verdict = try_resume!(sort.prefilter(&header, self.iter.as_mut(), budget));
                    *step = match verdict {
                        Prefilter::End => Step::Finish,
                        Prefilter::Reject => Step::Pull,
                        Prefilter::Unknown | Prefilter::Smaller => {
                            offer(sort, &self.projector, id, arrival, verdict, budget)?;
                            Step::Pull
                        }
                    };
                }
                Step::Condense => {
                    try_resume!(sort.condense(budget));
                    *step = Step::Pull;
                }
                Step::Finish => {
                    let page = try_resume!(sort.finish(budget));
                    let rows = page
                        .rows
                        .into_iter()
                        .map(|row| PageRow {
                            id: row.id,
                            keys: row.keys,
                            row: row.row,
                        })
                        .collect();
                    return Ok(Resume::Done(Page {
                        rows,
                        cursor: page.cursor.map(|cursor| cursor.to_string()),
                        turns: self.turns,
                        sort_stats: Some(sort.stats()),
                    }));
                }
            }
        }
    }
}

/// Project a candidate and hand it to the sort, resolving deferred keys once
fn offer<P: Projector>(
    sort: &mut IncrementalSort<P::Row>,
    projector: &P,
    id: Id,
    arrival: u64,
    verdict: Prefilter,
    budget: &mut Budget,
) -> Result<(), IterError> {
    let Some((row, values)) = projector.project(id, sort.keys(), budget)? else {
        return Ok(());
    };
    match sort.accept(id, arrival, values, row, verdict, budget)? {
        Admission::Stored | Admission::Rejected => Ok(()),
        Admission::Deferred { keys, row } => {
            let values = projector.resolve(id, sort.keys(), keys, budget)?;
            match sort.accept(id, arrival, values, row, verdict, budget)? {
                Admission::Deferred { .. } => Err(IterError::impossible(format!(
                    "sort key of {} could not be resolved",
                    id
                ))),
                Admission::Stored | Admission::Rejected => Ok(()),
            }
        }
    }
}
