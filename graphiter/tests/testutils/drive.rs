//! Helpers that retry suspended operations the way a scheduler would

use graphiter::{Budget, Id, IterResult, Page, PagedQuery, Projector, Resume, SetIterator};

/// Turns allowed before a helper assumes the operation never completes
const MAX_TURNS: usize = 1_000_000;

/// Retry `op` with a fresh `turn_budget` until it completes
pub fn until_done<T>(
    turn_budget: i64,
    mut op: impl FnMut(&mut Budget) -> IterResult<T>,
) -> (T, usize) {
    for turn in 1..=MAX_TURNS {
        let mut budget = Budget::new(turn_budget);
        match op(&mut budget).expect("budgeted operation failed") {
            Resume::Done(value) => return (value, turn),
            Resume::Suspended => continue,
        }
    }
    panic!("operation did not complete within {} turns", MAX_TURNS);
}

/// Next id, retrying suspensions
pub fn next(iter: &mut dyn SetIterator, turn_budget: i64) -> Option<Id> {
    until_done(turn_budget, |budget| iter.next(budget)).0
}

/// Find, retrying suspensions
pub fn find(iter: &mut dyn SetIterator, id: Id, turn_budget: i64) -> Option<Id> {
    until_done(turn_budget, |budget| iter.find(id, budget)).0
}

/// Check, retrying suspensions
pub fn check(iter: &mut dyn SetIterator, id: Id, turn_budget: i64) -> bool {
    until_done(turn_budget, |budget| iter.check(id, budget)).0
}

/// Every remaining id
pub fn drain(iter: &mut dyn SetIterator, turn_budget: i64) -> Vec<Id> {
    let mut out = Vec::new();
    while let Some(id) = next(iter, turn_budget) {
        out.push(id);
    }
    out
}

/// At most `n` ids
pub fn take(iter: &mut dyn SetIterator, n: usize, turn_budget: i64) -> Vec<Id> {
    let mut out = Vec::new();
    while out.len() < n {
        match next(iter, turn_budget) {
            Some(id) => out.push(id),
            None => break,
        }
    }
    out
}

/// Run a paged query to completion
pub fn page<P: Projector>(query: &mut PagedQuery<P>, turn_budget: i64) -> Page<P::Row> {
    until_done(turn_budget, |budget| query.run(budget)).0
}
