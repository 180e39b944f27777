// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cost budgets for cooperative evaluation
//!
//! A [`Budget`] is a signed cost allowance handed to every iterator and sort
//! operation. Operations deduct what they spend and may overrun slightly; a
//! budget at or below zero is exhausted. A budgeted operation that finds its
//! budget exhausted on entry returns [`Resume::Suspended`] without making
//! progress, so callers can retry it verbatim on the next scheduler turn.

use crate::error::IterError;
use std::fmt;

/// Outcome of a budgeted operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume<T> {
    /// The operation completed with a result
    Done(T),
    /// The budget ran out; retry the same call with a fresh budget
    Suspended,
}

impl<T> Resume<T> {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Resume::Suspended)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Resume::Done(value) => Some(value),
            Resume::Suspended => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resume<U> {
        match self {
            Resume::Done(value) => Resume::Done(f(value)),
            Resume::Suspended => Resume::Suspended,
        }
    }
}

/// Result type of budgeted iterator operations
pub type IterResult<T> = Result<Resume<T>, IterError>;

/// Per-call cost allowance
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    remaining: i64,
    spent: i64,
}

impl Budget {
    pub fn new(amount: i64) -> Self {
        Self {
            remaining: amount,
            spent: 0,
        }
    }

    /// A budget that no realistic evaluation exhausts
    pub fn unlimited() -> Self {
        Self::new(i64::MAX / 4)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn spent(&self) -> i64 {
        self.spent
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Deduct a cost. Overdrafts are allowed; the next budgeted call suspends.
    pub fn charge(&mut self, cost: i64) {
        self.remaining = self.remaining.saturating_sub(cost);
        self.spent = self.spent.saturating_add(cost);
    }

    /// Top up for a new scheduler turn, carrying any overdraft forward
    pub fn refill(&mut self, amount: i64) {
        self.remaining = self.remaining.min(0).saturating_add(amount);
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(crate::config::QueryConfig::default().turn_budget)
    }
}

impl fmt::Debug for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Budget")
            .field("remaining", &self.remaining)
            .field("spent", &self.spent)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Unit costs charged by the built-in iterators
pub mod cost {
    /// Reading a primitive record from the store
    pub const PRIMITIVE_READ: i64 = 20;
    /// Opening a posting list
    pub const POSTING_OPEN: i64 = 8;
    /// Listing index completions of a short prefix, per completion
    pub const COMPLETION: i64 = 2;
    /// Producing the next id of an in-memory set
    pub const SET_NEXT: i64 = 1;
    /// Binary search in an in-memory set
    pub const SET_FIND: i64 = 2;
    /// Serving a cached result
    pub const CACHE_READ: i64 = 1;
    /// One sort-key comparison
    pub const COMPARE: i64 = 1;
    /// Per-id cost of intersecting two resident sets
    pub const INTERSECT: i64 = 1;
    /// Recovering a posting list that was not resident, per id
    pub const RECOVER: i64 = 1;
    /// Matching a compiled glob, per 16 bytes of text
    pub const GLOB_MATCH: i64 = 1;

    /// Cost of matching a glob against a word of `len` bytes
    pub fn glob_match(len: usize) -> i64 {
        GLOB_MATCH * (len as i64 / 16 + 1)
    }
}

/// Return `Ok(Resume::Suspended)` when the budget is exhausted on entry
macro_rules! ensure_budget {
    ($budget:expr) => {
        if $budget.is_exhausted() {
            return Ok($crate::budget::Resume::Suspended);
        }
    };
}

/// Unwrap a `Resume::Done` value or propagate the suspension
macro_rules! try_resume {
    ($e:expr) => {
        match $e? {
            $crate::budget::Resume::Done(value) => value,
            $crate::budget::Resume::Suspended => {
                return Ok($crate::budget::Resume::Suspended);
            }
        }
    };
}

pub(crate) use ensure_budget;
pub(crate) use try_resume;

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded(budget: &mut Budget, cost: i64) -> IterResult<i64> {
        ensure_budget!(budget);
        budget.charge(cost);
        Ok(Resume::Done(budget.remaining()))
    }

    fn chained(budget: &mut Budget) -> IterResult<i64> {
        let first = try_resume!(guarded(budget, 3));
        let second = try_resume!(guarded(budget, 3));
        Ok(Resume::Done(first + second))
    }

    #[test]
    fn test_budget_charge_and_exhaustion() {
        let mut budget = Budget::new(10);
        assert!(!budget.is_exhausted());

        budget.charge(4);
        assert_eq!(budget.remaining(), 6);
        assert_eq!(budget.spent(), 4);

        budget.charge(6);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_overdraft_carries_into_refill() {
        let mut budget = Budget::new(5);
        budget.charge(8);
        assert_eq!(budget.remaining(), -3);

        budget.refill(10);
        assert_eq!(budget.remaining(), 7);

        // Unspent budget does not accumulate
        budget.refill(10);
        assert_eq!(budget.remaining(), 10);
    }

    #[test]
    fn test_exhausted_budget_suspends_without_progress() {
        let mut budget = Budget::new(0);
        assert_eq!(guarded(&mut budget, 5).unwrap(), Resume::Suspended);
        assert_eq!(budget.spent(), 0);
    }

    #[test]
    fn test_try_resume_propagates_suspension() {
        let mut budget = Budget::new(2);
        assert_eq!(chained(&mut budget).unwrap(), Resume::Suspended);

        let mut budget = Budget::new(100);
        assert_eq!(chained(&mut budget).unwrap(), Resume::Done(97 + 94));
    }

    #[test]
    fn test_resume_helpers() {
        let done: Resume<u32> = Resume::Done(2);
        assert_eq!(done.clone().map(|v| v * 2), Resume::Done(4));
        assert_eq!(done.done(), Some(2));
        assert!(Resume::<u32>::Suspended.is_suspended());
    }

    #[test]
    fn test_unlimited_budget() {
        let mut budget = Budget::unlimited();
        budget.charge(i64::MAX / 8);
        assert!(!budget.is_exhausted());
    }
}
