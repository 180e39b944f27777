// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Incremental top-K sort - one globally sorted, resumable page at a time
//!
//! Keeps at most `2P` candidates (P = page size + start offset) instead of
//! sorting the entire result set.

mod cursor;

pub use cursor::SortCursor;

use crate::budget::{cost, ensure_budget, try_resume, Budget, IterResult, Resume};
use crate::compare::{comparator, default_comparator, Comparator};
use crate::config::SortConfig;
use crate::error::SortError;
use crate::iter::SetIterator;
use crate::store::Id;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Sort order of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key: a projected field, a direction and a collation
#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
    pub comparator: Arc<dyn Comparator>,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Asc,
            comparator: default_comparator(),
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            direction: SortDirection::Desc,
            ..Self::asc(field)
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Parse `field[:asc|desc][:comparator]`
    pub fn parse(text: &str) -> Result<Self, SortError> {
        let mut parts = text.split(':');
        let field = parts.next().unwrap_or_default().trim();
        if field.is_empty() {
            return Err(SortError::InvalidSpec(format!("empty sort field in '{}'", text)));
        }
        let mut key = Self::asc(field);
        if let Some(direction) = parts.next() {
            key.direction = match direction.to_ascii_lowercase().as_str() {
                "" | "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                other => {
                    return Err(SortError::InvalidSpec(format!("unknown direction '{}'", other)));
                }
            };
        }
        if let Some(name) = parts.next() {
            key.comparator = comparator(name)
                .ok_or_else(|| SortError::InvalidSpec(format!("unknown comparator '{}'", name)))?;
        }
        if parts.next().is_some() {
            return Err(SortError::InvalidSpec(format!("too many parts in '{}'", text)));
        }
        Ok(key)
    }

    /// Parse a comma-separated key list
    pub fn parse_list(text: &str) -> Result<Vec<Self>, SortError> {
        text.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Compare two values in this key's order
    pub fn order(&self, a: &Value, b: &Value) -> Ordering {
        let ord = a.compare(b, self.comparator.as_ref());
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}", self.field),
            SortDirection::Desc => write!(f, "{}:desc", self.field),
        }
    }
}

/// Outcome of comparing a candidate's cheap header fields to the median
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefilter {
    /// Not decidable from the header; project and accept
    Unknown,
    /// Strictly smaller than the median; accept skips its comparison
    Smaller,
    /// Provably outside the page
    Reject,
    /// Outside the page, and so is everything the source still produces
    End,
}

/// Outcome of offering a projected candidate
#[derive(Debug)]
pub enum Admission<R> {
    Stored,
    Rejected,
    /// A key value is still deferred; resolve it and offer again
    Deferred { keys: Vec<Value>, row: R },
}

/// Sort statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Candidates seen by the prefilter
    pub arrivals: usize,
    pub prefilter_rejects: usize,
    pub accepted: usize,
    /// Rejected by accept (cursor or median)
    pub rejected: usize,
    pub deferred: usize,
    pub condenses: usize,
    /// Page size plus start offset
    pub window: usize,
}

impl SortStats {
    /// Fraction of arrivals that never reached storage
    pub fn discard_ratio(&self) -> f64 {
        if self.arrivals == 0 {
            return 0.0;
        }
        (self.arrivals - self.accepted.min(self.arrivals)) as f64 / self.arrivals as f64
    }
}

/// One row of a finished page
#[derive(Debug, Clone)]
pub struct SortedRow<R> {
    pub id: Id,
    pub keys: Vec<Value>,
    pub arrival: u64,
    pub row: R,
}

/// A finished page with its continuation
#[derive(Debug)]
pub struct SortedPage<R> {
    pub rows: Vec<SortedRow<R>>,
    /// Last row of a full page; `None` when no later page exists
    pub cursor: Option<SortCursor>,
}

enum Condense {
    Idle,
    Merging { head: usize, run: usize, out: usize },
}

/// Incremental top-K sort
///
/// Candidates arrive in source order, each tagged with its arrival ordinal.
/// The index array holds three P-slot regions over the backing columns:
///
/// ```text
/// [0, P)    sorted head
/// [P, 2P)   incoming candidates, unsorted
/// [2P, 3P)  merge scratch
/// ```
///
/// Once the head and incoming regions hold 2P candidates, a condense sorts
/// the incoming run and merges it with the head, keeping the smallest P.
/// After the first condense the P-th head row is the median every further
/// candidate must beat.
///
/// # Algorithm
///
/// 1. [`prefilter`](Self::prefilter) compares the cheap header fields of a
///    candidate with the median; the first differing key decides
/// 2. [`accept`](Self::accept) re-compares the full projection, applies the
///    pagination cursor and stores the candidate
/// 3. [`condense`](Self::condense) runs whenever [`needs_condense`](Self::needs_condense)
/// 4. [`finish`](Self::finish) condenses one last time and permutes the
///    backing columns into sorted order in place
///
/// # Performance
///
/// - **Time complexity**: O(N log P) amortized
/// - **Space complexity**: O(P) - at most 2P rows held at once
pub struct IncrementalSort<R> {
    keys: Vec<SortKey>,
    window: usize,
    start: usize,
    cursor: Option<SortCursor>,

    index: Vec<usize>,
    head_len: usize,
    incoming: usize,

    // Backing columns, one entry per slot
    ids: Vec<Id>,
    arrivals: Vec<u64>,
    columns: Vec<Vec<Value>>,
    rows: Vec<Option<R>>,
    free: Vec<usize>,

    have_median: bool,
    ended: bool,
    /// Source arrives in key order: candidates need no comparison
    blind: bool,
    /// Source is ordered on the first key
    ordered: bool,
    condense: Condense,
    condense_pending: bool,
    finished: bool,
    stats: SortStats,
}

impl<R> IncrementalSort<R> {
    /// Create a sort producing `page_size` rows after skipping `start`
    pub fn new(
        keys: Vec<SortKey>,
        page_size: usize,
        start: usize,
        config: &SortConfig,
    ) -> Result<Self, SortError> {
        if keys.is_empty() {
            return Err(SortError::InvalidSpec("no sort keys".to_string()));
        }
        if page_size == 0 {
            return Err(SortError::InvalidSpec("page size must be > 0".to_string()));
        }
        let window = page_size
            .checked_add(start)
            .filter(|w| *w <= config.max_window)
            .ok_or_else(|| {
                SortError::InvalidSpec(format!(
                    "start {} + page size {} exceeds the sort window of {}",
                    start, page_size, config.max_window
                ))
            })?;

        let columns = vec![Vec::new(); keys.len()];
        Ok(Self {
            keys,
            window,
            start,
            cursor: None,
            index: vec![0; 3 * window],
            head_len: 0,
            incoming: 0,
            ids: Vec::new(),
            arrivals: Vec::new(),
            columns,
            rows: Vec::new(),
            free: Vec::new(),
            have_median: false,
            ended: false,
            blind: false,
            ordered: false,
            condense: Condense::Idle,
            condense_pending: false,
            finished: false,
            stats: SortStats {
                window,
                ..Default::default()
            },
        })
    }

    /// Only rows sorting strictly after `cursor` are accepted
    pub fn with_cursor(mut self, cursor: Option<SortCursor>) -> Result<Self, SortError> {
        if let Some(cursor) = &cursor {
            if cursor.keys.len() != self.keys.len() {
                return Err(SortError::KeyArity {
                    expected: self.keys.len(),
                    got: cursor.keys.len(),
                });
            }
        }
        self.cursor = cursor;
        Ok(self)
    }

    /// Take advantage of a source already ordered on the first key
    pub fn with_source_order(mut self, source: &dyn SetIterator) -> Self {
        let first = &self.keys[0];
        self.ordered = source.sorted()
            && source.ordering() == Some(first.field.as_str())
            && (first.direction == SortDirection::Asc) == source.direction().is_forward();
        self.blind = self.ordered && self.keys.len() == 1;
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Whether evaluation ended early
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Candidates currently held
    pub fn len(&self) -> usize {
        self.head_len + self.incoming
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn needs_condense(&self) -> bool {
        self.condense_pending
    }

    /// Judge a candidate by its header fields
    ///
    /// `header[k]` is the value of key `k` if it is known without a full
    /// projection. On [`Prefilter::End`] the caller stops pulling from
    /// `source` and calls [`finish`](Self::finish).
    pub fn prefilter(
        &mut self,
        header: &[Option<Value>],
        source: &mut dyn SetIterator,
        budget: &mut Budget,
    ) -> IterResult<Prefilter> {
        ensure_budget!(budget);
        if self.ended {
            return Ok(Resume::Done(Prefilter::End));
        }
        let verdict = try_resume!(self.judge(header, source, budget));

        self.stats.arrivals += 1;
        match verdict {
            Prefilter::Reject => self.stats.prefilter_rejects += 1,
            Prefilter::End => {
                self.ended = true;
                log::debug!(
                    "Sort ended early after {} arrivals ({} held)",
                    self.stats.arrivals,
                    self.len()
                );
            }
            Prefilter::Unknown | Prefilter::Smaller => {}
        }
        Ok(Resume::Done(verdict))
    }

    fn judge(
        &self,
        header: &[Option<Value>],
        source: &mut dyn SetIterator,
        budget: &mut Budget,
    ) -> IterResult<Prefilter> {
        if !self.have_median {
            return Ok(Resume::Done(if self.blind {
                Prefilter::Smaller
            } else {
                Prefilter::Unknown
            }));
        }
        if self.blind {
            return Ok(Resume::Done(Prefilter::End));
        }

        let median = self.index[self.window - 1];
        for (k, key) in self.keys.iter().enumerate() {
            let value = match header.get(k) {
                Some(Some(value)) if !value.is_deferred() => value,
                _ => return Ok(Resume::Done(Prefilter::Unknown)),
            };
            budget.charge(cost::COMPARE);
            match key.order(value, &self.columns[k][median]) {
                Ordering::Less => return Ok(Resume::Done(Prefilter::Smaller)),
                Ordering::Greater => {
                    if k == 0 && self.ordered {
                        let bound = self.columns[0][median].clone();
                        if try_resume!(source.beyond(&bound, budget)) {
                            return Ok(Resume::Done(Prefilter::End));
                        }
                    }
                    return Ok(Resume::Done(Prefilter::Reject));
                }
                Ordering::Equal => {}
            }
        }
        // Equal keys: a later arrival sorts after the median
        Ok(Resume::Done(Prefilter::Reject))
    }

    /// Offer a projected candidate
    ///
    /// `verdict` is the candidate's prefilter outcome, or
    /// [`Prefilter::Unknown`] if it was not prefiltered.
    pub fn accept(
        &mut self,
        id: Id,
        arrival: u64,
        keys: Vec<Value>,
        row: R,
        verdict: Prefilter,
        budget: &mut Budget,
    ) -> Result<Admission<R>, SortError> {
        if self.finished {
            return Err(SortError::Finished);
        }
        if self.condense_pending {
            return Err(SortError::CondensePending);
        }
        if keys.len() != self.keys.len() {
            return Err(SortError::KeyArity {
                expected: self.keys.len(),
                got: keys.len(),
            });
        }
        if keys.iter().any(Value::is_deferred) {
            self.stats.deferred += 1;
            return Ok(Admission::Deferred { keys, row });
        }

        if self.admissible(&keys, arrival, verdict, budget) {
            let slot = self.alloc(id, arrival, keys, row);
            if self.blind {
                self.index[self.head_len] = slot;
                self.head_len += 1;
                self.have_median = self.head_len == self.window;
            } else {
                self.index[self.window + self.incoming] = slot;
                self.incoming += 1;
                self.condense_pending = self.head_len + self.incoming == 2 * self.window;
            }
            self.stats.accepted += 1;
            Ok(Admission::Stored)
        } else {
            self.stats.rejected += 1;
            Ok(Admission::Rejected)
        }
    }

    fn admissible(&self, keys: &[Value], arrival: u64, verdict: Prefilter, budget: &mut Budget) -> bool {
        if matches!(verdict, Prefilter::Reject | Prefilter::End) {
            return false;
        }
        if self.blind && self.have_median {
            return false;
        }
        if let Some(cursor) = &self.cursor {
            budget.charge(cost::COMPARE * self.keys.len() as i64);
            let ord = order_values(&self.keys, keys, &cursor.keys)
                .then(arrival.cmp(&cursor.arrival));
            if ord != Ordering::Greater {
                return false;
            }
        }
        if self.have_median && !self.blind && verdict != Prefilter::Smaller {
            budget.charge(cost::COMPARE * self.keys.len() as i64);
            let median = self.index[self.window - 1];
            let ord = self
                .keys
                .iter()
                .enumerate()
                .map(|(k, key)| key.order(&keys[k], &self.columns[k][median]))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
                .then(arrival.cmp(&self.arrivals[median]));
            if ord != Ordering::Less {
                return false;
            }
        }
        true
    }

    fn alloc(&mut self, id: Id, arrival: u64, keys: Vec<Value>, row: R) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.ids[slot] = id;
                self.arrivals[slot] = arrival;
                for (column, value) in self.columns.iter_mut().zip(keys) {
                    column[slot] = value;
                }
                self.rows[slot] = Some(row);
                slot
            }
            None => {
                self.ids.push(id);
                self.arrivals.push(arrival);
                for (column, value) in self.columns.iter_mut().zip(keys) {
                    column.push(value);
                }
                self.rows.push(Some(row));
                self.ids.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.rows[slot] = None;
        for column in &mut self.columns {
            column[slot] = Value::Null;
        }
        self.free.push(slot);
    }

    /// Sort the incoming run and merge it into the head, keeping the
    /// smallest P candidates
    pub fn condense(&mut self, budget: &mut Budget) -> Result<Resume<()>, SortError> {
        ensure_budget!(budget);
        let window = self.window;

        let (mut head, mut run, mut out) = match self.condense {
            Condense::Merging { head, run, out } => (head, run, out),
            Condense::Idle => {
                if self.incoming == 0 {
                    self.condense_pending = false;
                    return Ok(Resume::Done(()));
                }
                self.sort_incoming(budget);
                if self.head_len == 0 {
                    let keep = self.incoming.min(window);
                    for i in 0..keep {
                        self.index[i] = self.index[window + i];
                    }
                    for i in keep..self.incoming {
                        self.release(self.index[window + i]);
                    }
                    self.head_len = keep;
                    self.end_round();
                    return Ok(Resume::Done(()));
                }
                (0, 0, 0)
            }
        };

        while out < window && (head < self.head_len || run < self.incoming) {
            if budget.is_exhausted() {
                self.condense = Condense::Merging { head, run, out };
                return Ok(Resume::Suspended);
            }
            let take_head = if head == self.head_len {
                false
            } else if run == self.incoming {
                true
            } else {
                budget.charge(cost::COMPARE);
                self.order_slots(self.index[head], self.index[window + run]) != Ordering::Greater
            };
            let slot = if take_head {
                head += 1;
                self.index[head - 1]
            } else {
                run += 1;
                self.index[window + run - 1]
            };
            self.index[2 * window + out] = slot;
            out += 1;
        }

        for i in head..self.head_len {
            self.release(self.index[i]);
        }
        for i in run..self.incoming {
            self.release(self.index[window + i]);
        }
        for i in 0..out {
            self.index[i] = self.index[2 * window + i];
        }
        self.head_len = out;
        self.end_round();
        Ok(Resume::Done(()))
    }

    fn sort_incoming(&mut self, budget: &mut Budget) {
        let n = self.incoming;
        let depth = (usize::BITS - n.leading_zeros()) as i64;
        budget.charge(cost::COMPARE * n as i64 * depth);

        let window = self.window;
        let (keys, columns, arrivals) = (&self.keys, &self.columns, &self.arrivals);
        self.index[window..window + n].sort_by(|&a, &b| {
            order_slots(keys, columns, a, b).then(arrivals[a].cmp(&arrivals[b]))
        });
    }

    fn end_round(&mut self) {
        self.incoming = 0;
        self.condense = Condense::Idle;
        self.condense_pending = false;
        self.have_median = self.head_len == self.window;
        self.stats.condenses += 1;
        log::debug!(
            "Sort condense #{}: {} rows kept of window {}",
            self.stats.condenses,
            self.head_len,
            self.window
        );
    }

    fn order_slots(&self, a: usize, b: usize) -> Ordering {
        order_slots(&self.keys, &self.columns, a, b).then(self.arrivals[a].cmp(&self.arrivals[b]))
    }

    /// Produce the page
    ///
    /// Rows before `start` are dropped. The cursor is set only when the
    /// window is full, i.e. a later page may exist.
    pub fn finish(&mut self, budget: &mut Budget) -> Result<Resume<SortedPage<R>>, SortError> {
        if self.finished {
            return Err(SortError::Finished);
        }
        if self.incoming > 0 || matches!(self.condense, Condense::Merging { .. }) {
            try_resume!(self.condense(budget));
        }

        let n = self.head_len;
        self.permute();
        self.ids.truncate(n);
        self.arrivals.truncate(n);
        self.rows.truncate(n);
        for column in &mut self.columns {
            column.truncate(n);
        }
        self.free.clear();
        self.finished = true;

        let cursor = (n == self.window && n > 0).then(|| {
            let keys = self.columns.iter().map(|column| column[n - 1].clone()).collect();
            SortCursor::new(keys, self.arrivals[n - 1])
        });

        let rows = (self.start..n)
            .filter_map(|i| {
                let row = self.rows[i].take()?;
                Some(SortedRow {
                    id: self.ids[i],
                    keys: self
                        .columns
                        .iter_mut()
                        .map(|column| std::mem::replace(&mut column[i], Value::Null))
                        .collect(),
                    arrival: self.arrivals[i],
                    row,
                })
            })
            .collect();

        log::debug!(
            "Sort finished: {} arrivals, {} accepted, {} condenses, discard ratio {:.2}",
            self.stats.arrivals,
            self.stats.accepted,
            self.stats.condenses,
            self.stats.discard_ratio()
        );
        Ok(Resume::Done(SortedPage { rows, cursor }))
    }

    /// Reorder the backing columns so position `i` holds head row `i`
    fn permute(&mut self) {
        let total = self.ids.len();
        let mut in_head = vec![false; total];
        let mut perm = Vec::with_capacity(total);
        for &slot in &self.index[..self.head_len] {
            in_head[slot] = true;
            perm.push(slot);
        }
        perm.extend((0..total).filter(|slot| !in_head[*slot]));

        // Each cycle is walked once; position j takes the element at perm[j]
        for i in 0..total {
            let mut j = i;
            loop {
                let k = perm[j];
                perm[j] = j;
                if k == i {
                    break;
                }
                self.ids.swap(j, k);
                self.arrivals.swap(j, k);
                self.rows.swap(j, k);
                for column in &mut self.columns {
                    column.swap(j, k);
                }
                j = k;
            }
        }
    }
}

fn order_values(keys: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
    keys.iter()
        .zip(a.iter().zip(b))
        .map(|(key, (x, y))| key.order(x, y))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn order_slots(keys: &[SortKey], columns: &[Vec<Value>], a: usize, b: usize) -> Ordering {
    keys.iter()
        .zip(columns)
        .map(|(key, column)| key.order(&column[a], &column[b]))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl<R> fmt::Debug for IncrementalSort<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalSort")
            .field("keys", &self.keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())
            .field("window", &self.window)
            .field("start", &self.start)
            .field("held", &self.len())
            .field("have_median", &self.have_median)
            .field("blind", &self.blind)
            .field("ended", &self.ended)
            .field("stats", &self.stats)
            .finish()
    }
}
