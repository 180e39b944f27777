// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Constraint compiler
//!
//! Turns a [`Constraint`] tree into a tree of set iterators. Store lookups
//! are charged to the caller's budget as fixed line items; compiling never
//! suspends. Unsatisfiable leaves compile to empty id sets rather than
//! errors, so a query over them simply produces nothing.

use crate::budget::{cost, Budget};
use crate::compare::GlobPrefix;
use crate::env::EvalEnv;
use crate::error::IterError;
use crate::iter::{
    AndIterator, Direction, IdRange, IdSet, IdSetIterator, PrefixIterator, PrimitiveSummary,
    SetIterator, UnionIterator, VipIterator,
};
use crate::store::{Id, Linkage, Postings};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Read-side query constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Constraint {
    /// Every live primitive
    All,
    /// An explicit id list
    Ids { ids: Vec<Id> },
    /// Primitives containing every word of `word`
    Word { word: String },
    /// Primitives with a word matching each whitespace-separated pattern
    Glob { pattern: String },
    /// Primitives with a word collating within `[lo, hi)`
    Range {
        #[serde(default)]
        lo: Option<String>,
        #[serde(default)]
        hi: Option<String>,
    },
    /// Primitives whose `role` linkage points at `endpoint`, optionally of
    /// a given type
    Linked {
        role: Linkage,
        endpoint: Id,
        #[serde(default, rename = "type")]
        type_id: Option<Id>,
    },
    And { all: Vec<Constraint> },
    Or { any: Vec<Constraint> },
}

impl Constraint {
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid constraint: {}", e))
    }
}

/// Compile `constraint` into an iterator over `range` (default: every id
/// the store has allocated)
pub fn compile(
    constraint: &Constraint,
    env: &EvalEnv,
    range: Option<IdRange>,
    direction: Direction,
    budget: &mut Budget,
) -> Result<Box<dyn SetIterator>, IterError> {
    let range = range.unwrap_or_else(|| IdRange::up_to(env.store.id_limit()));
    let iter = Compiler {
        env,
        range,
        direction,
        budget,
    }
    .compile(constraint)?;
    log::debug!("Compiled constraint into {:?} iterator", iter.kind());
    Ok(iter)
}

struct Compiler<'a> {
    env: &'a EvalEnv,
    range: IdRange,
    direction: Direction,
    budget: &'a mut Budget,
}

impl Compiler<'_> {
    fn compile(&mut self, constraint: &Constraint) -> Result<Box<dyn SetIterator>, IterError> {
        match constraint {
            Constraint::All => {
                self.budget.charge(cost::POSTING_OPEN);
                let postings = self.env.store.live_postings()?;
                Ok(self.postings(postings))
            }

            Constraint::Ids { ids } => Ok(self.fixed(IdSet::new(ids.clone()))),

            Constraint::Word { word } => {
                let words = self.env.comparator.words(word);
                if words.is_empty() {
                    return Ok(self.empty());
                }
                let children = words
                    .iter()
                    .map(|w| self.word(w))
                    .collect::<Result<Vec<_>, _>>()?;
                self.intersect(children)
            }

            Constraint::Glob { pattern } if pattern.trim().is_empty() => Ok(self.empty()),

            Constraint::Glob { pattern } => {
                let children = pattern
                    .split_whitespace()
                    .map(|token| self.glob(token))
                    .collect::<Result<Vec<_>, _>>()?;
                self.intersect(children)
            }

            Constraint::Range { lo, hi } => self.word_range(lo.as_deref(), hi.as_deref()),

            Constraint::Linked {
                role,
                endpoint,
                type_id: Some(type_id),
            } => Ok(VipIterator::create(
                self.env.store.clone(),
                *role,
                *endpoint,
                *type_id,
                self.range,
                self.direction,
                &self.env.config.vip,
                self.budget,
            )?
            .boxed()),

            Constraint::Linked {
                role,
                endpoint,
                type_id: None,
            } => {
                self.budget.charge(cost::POSTING_OPEN);
                let postings = self.env.store.linkage_postings(*role, *endpoint)?;
                let summary = PrimitiveSummary {
                    linkages: vec![(*role, *endpoint)],
                    complete: true,
                };
                Ok(match postings {
                    Some(postings) => {
                        IdSetIterator::from_postings(postings, self.range, self.direction)
                            .with_summary(summary)
                            .boxed()
                    }
                    None => self.empty(),
                })
            }

            Constraint::And { all } => {
                let children = all
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>, _>>()?;
                self.intersect(children)
            }

            Constraint::Or { any } => {
                let mut children = any
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match children.len() {
                    0 => self.empty(),
                    1 => children.remove(0),
                    _ => UnionIterator::new(children, self.range, self.direction).boxed(),
                })
            }
        }
    }

    fn word(&mut self, word: &str) -> Result<Box<dyn SetIterator>, IterError> {
        self.budget.charge(cost::POSTING_OPEN);
        let postings = self.env.store.word_postings(word)?;
        Ok(self.postings(postings))
    }

    fn glob(&mut self, token: &str) -> Result<Box<dyn SetIterator>, IterError> {
        match self.env.comparator.glob_prefix(token) {
            // Index words never contain `*`; keep it from reading as a prefix key
            GlobPrefix::Exact(word) if word.contains('*') => Ok(self.empty()),
            GlobPrefix::Exact(word) => self.word(&word),
            GlobPrefix::Prefix(prefix) if prefix.is_empty() => self.compile(&Constraint::All),
            GlobPrefix::Prefix(prefix) => Ok(PrefixIterator::new(
                self.env.store.clone(),
                &prefix,
                self.range,
                self.direction,
                &self.env.config.prefix,
            )
            .boxed()),
            GlobPrefix::Complex(literal) => {
                // Test every completion of the literal head against the pattern
                let completions = self.env.store.completions(&literal)?;
                self.budget
                    .charge(cost::COMPLETION * (completions.len() as i64).max(1));
                let comparator = self.env.comparator.clone();
                let matcher = comparator.glob_matcher(token)?;
                let mut matching = Vec::new();
                for word in &completions {
                    self.budget.charge(cost::glob_match(word.len()));
                    if comparator.glob_match(&matcher, word) {
                        matching.push(word);
                    }
                }
                self.words_union(matching)
            }
        }
    }

    fn word_range(
        &mut self,
        lo: Option<&str>,
        hi: Option<&str>,
    ) -> Result<Box<dyn SetIterator>, IterError> {
        let mut words = self.env.store.completions("")?;
        self.budget
            .charge(cost::COMPLETION * (words.len() as i64).max(1));
        let comparator = self.env.comparator.clone();
        words.sort_by(|a, b| comparator.compare(a, b));
        if matches!((lo, hi), (Some(lo), Some(hi)) if comparator.compare(lo, hi) != Ordering::Less)
        {
            return Ok(self.empty());
        }
        let span = comparator.bisect_range(&words, lo, hi);
        let selected: Vec<&String> = words[span].iter().collect();
        self.words_union(selected)
    }

    fn words_union(&mut self, words: Vec<&String>) -> Result<Box<dyn SetIterator>, IterError> {
        let mut branches = Vec::with_capacity(words.len());
        for word in words {
            self.budget.charge(cost::POSTING_OPEN);
            if let Some(postings) = self.env.store.word_postings(word)? {
                branches.push(IdSetIterator::from_postings(postings, self.range, self.direction).boxed());
            }
        }
        Ok(match branches.len() {
            0 => self.empty(),
            1 => branches.remove(0),
            _ => UnionIterator::new(branches, self.range, self.direction).boxed(),
        })
    }

    /// Intersect children, directly when every set is already resident
    fn intersect(
        &mut self,
        mut children: Vec<Box<dyn SetIterator>>,
    ) -> Result<Box<dyn SetIterator>, IterError> {
        if children.is_empty() {
            return self.compile(&Constraint::All);
        }
        if children.len() == 1 {
            return Ok(children.remove(0));
        }

        let resident: Option<Vec<Arc<IdSet>>> =
            children.iter().map(|c| c.resident_set()).collect();
        if let Some(mut sets) = resident {
            sets.sort_by_key(|s| s.len());
            let mut acc = sets[0].as_ref().clone();
            for set in &sets[1..] {
                self.budget
                    .charge(cost::INTERSECT * (acc.len() + set.len()) as i64);
                acc = acc.intersect(set);
            }
            return Ok(self.fixed(acc));
        }

        Ok(AndIterator::new(children, self.range, self.direction)?.boxed())
    }

    fn postings(&self, postings: Option<Postings>) -> Box<dyn SetIterator> {
        match postings {
            Some(postings) => {
                IdSetIterator::from_postings(postings, self.range, self.direction).boxed()
            }
            None => self.empty(),
        }
    }

    fn fixed(&self, set: IdSet) -> Box<dyn SetIterator> {
        IdSetIterator::new(Arc::new(set), self.range, self.direction).boxed()
    }

    fn empty(&self) -> Box<dyn SetIterator> {
        IdSetIterator::empty(self.range, self.direction).boxed()
    }
}
