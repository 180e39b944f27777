// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! String comparators
//!
//! A comparator defines string equality, ordering, glob matching and index
//! normalization. The [`DefaultComparator`] orders case-insensitively and
//! breaks ties bytewise, so distinct strings never compare equal. Named
//! comparators live in a process-wide registry.

mod glob;

pub use glob::{GlobMatcher, GlobPrefix};

use crate::error::IterError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Leaf predicate operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Glob,
}

/// String comparison strategy
pub trait Comparator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fold a character for matching purposes
    fn fold(&self, ch: char) -> char {
        ch
    }

    /// Index form of a word
    fn normalize(&self, text: &str) -> String {
        text.chars().map(|c| self.fold(c)).collect()
    }

    fn compare(&self, a: &str, b: &str) -> Ordering;

    /// Split text into normalized index words
    fn words(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| self.normalize(w))
            .collect()
    }

    /// Compile a glob once for matching many words
    fn glob_matcher(&self, pattern: &str) -> Result<GlobMatcher, IterError> {
        GlobMatcher::new(&glob::tokenize(pattern, |c| self.fold(c)))
            .map_err(|e| IterError::impossible(format!("glob '{}': {}", pattern, e)))
    }

    fn glob_match(&self, matcher: &GlobMatcher, text: &str) -> bool {
        let folded: String = text.chars().map(|c| self.fold(c)).collect();
        matcher.is_match(&folded)
    }

    fn glob(&self, pattern: &str, text: &str) -> bool {
        self.glob_matcher(pattern)
            .map(|matcher| self.glob_match(&matcher, text))
            .unwrap_or(false)
    }

    /// Normalized literal head of a glob pattern
    fn glob_prefix(&self, pattern: &str) -> GlobPrefix {
        glob::prefix_of(&glob::tokenize(pattern, |c| self.fold(c)))
    }

    /// Bin of `value` given sorted bin boundaries: the number of boundaries
    /// that are less than or equal to it
    fn bin_of(&self, boundaries: &[String], value: &str) -> usize {
        boundaries.partition_point(|b| self.compare(b, value) != Ordering::Greater)
    }

    /// Slice of a sorted word list within `[lo, hi)`
    fn bisect_range(&self, sorted: &[String], lo: Option<&str>, hi: Option<&str>) -> Range<usize> {
        let start = lo.map_or(0, |lo| {
            sorted.partition_point(|w| self.compare(w, lo) == Ordering::Less)
        });
        let end = hi.map_or(sorted.len(), |hi| {
            sorted.partition_point(|w| self.compare(w, hi) == Ordering::Less)
        });
        start..end.max(start)
    }

    fn matches(&self, op: CompareOp, value: &str, operand: &str) -> bool {
        match op {
            CompareOp::Glob => self.glob(operand, value),
            CompareOp::Eq => self.compare(value, operand) == Ordering::Equal,
            CompareOp::Ne => self.compare(value, operand) != Ordering::Equal,
            CompareOp::Lt => self.compare(value, operand) == Ordering::Less,
            CompareOp::Le => self.compare(value, operand) != Ordering::Greater,
            CompareOp::Gt => self.compare(value, operand) == Ordering::Greater,
            CompareOp::Ge => self.compare(value, operand) != Ordering::Less,
        }
    }
}

/// Case-insensitive ordering with a bytewise tie-break
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparator;

impl Comparator for DefaultComparator {
    fn name(&self) -> &'static str {
        "default"
    }

    fn fold(&self, ch: char) -> char {
        ch.to_lowercase().next().unwrap_or(ch)
    }

    fn normalize(&self, text: &str) -> String {
        text.to_lowercase()
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        let folded = a
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(b.chars().flat_map(char::to_lowercase));
        folded.then_with(|| a.as_bytes().cmp(b.as_bytes()))
    }
}

/// Plain byte ordering
#[derive(Debug, Clone, Copy, Default)]
pub struct OctetComparator;

impl Comparator for OctetComparator {
    fn name(&self) -> &'static str {
        "octet"
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn Comparator>>>> = Lazy::new(|| {
    let mut map: HashMap<String, Arc<dyn Comparator>> = HashMap::new();
    let default: Arc<dyn Comparator> = Arc::new(DefaultComparator);
    map.insert("default".to_string(), default.clone());
    map.insert("case-insensitive".to_string(), default);
    map.insert("octet".to_string(), Arc::new(OctetComparator));
    RwLock::new(map)
});

/// Look up a comparator by name
pub fn comparator(name: &str) -> Option<Arc<dyn Comparator>> {
    REGISTRY.read().get(name).cloned()
}

pub fn default_comparator() -> Arc<dyn Comparator> {
    comparator("default").unwrap_or_else(|| Arc::new(DefaultComparator))
}

/// Register a comparator under its own name, replacing any previous one
pub fn register_comparator(comparator: Arc<dyn Comparator>) {
    log::debug!("Registering comparator '{}'", comparator.name());
    REGISTRY
        .write()
        .insert(comparator.name().to_string(), comparator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ordering() {
        let cmp = DefaultComparator;
        assert_eq!(cmp.compare("apple", "Banana"), Ordering::Less);
        assert_eq!(cmp.compare("Zeta", "alpha"), Ordering::Greater);
        // Case-insensitive equal strings tie-break bytewise
        assert_eq!(cmp.compare("ABC", "abc"), Ordering::Less);
        assert_eq!(cmp.compare("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn test_octet_ordering() {
        let cmp = OctetComparator;
        assert_eq!(cmp.compare("Zeta", "alpha"), Ordering::Less);
        assert!(!cmp.glob("A*", "abc"));
    }

    #[test]
    fn test_glob_matcher_is_reusable() {
        let cmp = DefaultComparator;
        let matcher = cmp.glob_matcher("*A*a*A*a*A*a*b").unwrap();
        let long = "a".repeat(40);
        assert!(!cmp.glob_match(&matcher, &long));
        assert!(cmp.glob_match(&matcher, &format!("{}B", long)));
        assert!(!cmp.glob("*a*a*a*a*a*a*b", &long));
    }

    #[test]
    fn test_default_glob_is_case_insensitive() {
        let cmp = DefaultComparator;
        assert!(cmp.glob("AB*", "abc"));
        assert!(cmp.glob("a?C", "ABc"));
        assert_eq!(cmp.glob_prefix("Ab*"), GlobPrefix::Prefix("ab".into()));
    }

    #[test]
    fn test_words() {
        let cmp = DefaultComparator;
        assert_eq!(cmp.words("Hello, World-42"), vec!["hello", "world", "42"]);
        assert!(cmp.words("  --  ").is_empty());
    }

    #[test]
    fn test_bisection() {
        let cmp = DefaultComparator;
        let bounds: Vec<String> = ["d", "m", "t"].iter().map(|s| s.to_string()).collect();
        assert_eq!(cmp.bin_of(&bounds, "a"), 0);
        assert_eq!(cmp.bin_of(&bounds, "d"), 1);
        assert_eq!(cmp.bin_of(&bounds, "Q"), 2);
        assert_eq!(cmp.bin_of(&bounds, "zz"), 3);

        let words: Vec<String> = ["ant", "bee", "cat", "dog"].iter().map(|s| s.to_string()).collect();
        assert_eq!(cmp.bisect_range(&words, Some("b"), Some("d")), 1..3);
        assert_eq!(cmp.bisect_range(&words, None, Some("bee")), 0..1);
        assert_eq!(cmp.bisect_range(&words, Some("z"), Some("a")), 4..4);
    }

    #[test]
    fn test_leaf_predicates() {
        let cmp = DefaultComparator;
        assert!(cmp.matches(CompareOp::Glob, "Hello", "h*"));
        assert!(cmp.matches(CompareOp::Lt, "apple", "b"));
        assert!(cmp.matches(CompareOp::Ge, "b", "b"));
        assert!(cmp.matches(CompareOp::Ne, "b", "B"));
    }

    #[test]
    fn test_registry() {
        assert_eq!(comparator("octet").map(|c| c.name()), Some("octet"));
        assert_eq!(comparator("case-insensitive").map(|c| c.name()), Some("default"));
        assert!(comparator("unknown").is_none());
        assert_eq!(default_comparator().name(), "default");
    }
}
