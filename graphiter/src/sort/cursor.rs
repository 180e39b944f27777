// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sort pagination cursors
//!
//! ```text
//! sort:n3;1          keys (3), arrival ordinal 1 of the last row emitted
//! sort:sAda,i7;42    two keys
//! null:              the previous page was the last one
//! ```

use crate::error::SortError;
use crate::value::Value;
use std::fmt;

const SORT_TAG: &str = "sort:";
const NULL_CURSOR: &str = "null:";

/// The last row of a page: everything after it belongs to later pages
#[derive(Debug, Clone, PartialEq)]
pub struct SortCursor {
    pub keys: Vec<Value>,
    /// Source arrival ordinal, breaking ties between equal keys
    pub arrival: u64,
}

impl SortCursor {
    pub fn new(keys: Vec<Value>, arrival: u64) -> Self {
        Self { keys, arrival }
    }

    /// Parse cursor text; `null:` yields `None`
    pub fn parse(text: &str) -> Result<Option<Self>, SortError> {
        if text == NULL_CURSOR {
            return Ok(None);
        }
        let body = text
            .strip_prefix(SORT_TAG)
            .ok_or_else(|| SortError::BadCursor(format!("missing '{}' tag in '{}'", SORT_TAG, text)))?;
        let (keys, arrival) = body
            .rsplit_once(';')
            .ok_or_else(|| SortError::BadCursor(format!("missing arrival in '{}'", text)))?;
        let arrival = arrival
            .parse::<u64>()
            .map_err(|_| SortError::BadCursor(format!("bad arrival '{}'", arrival)))?;
        if keys.is_empty() {
            return Err(SortError::BadCursor("no sort keys".to_string()));
        }
        let keys = keys
            .split(',')
            .map(|key| Value::from_cursor(key).map_err(SortError::BadCursor))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self { keys, arrival }))
    }

    /// Cursor text of an optional cursor
    pub fn format(cursor: Option<&SortCursor>) -> String {
        match cursor {
            Some(cursor) => cursor.to_string(),
            None => NULL_CURSOR.to_string(),
        }
    }
}

impl fmt::Display for SortCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SORT_TAG)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            // Rows holding deferred values are never stored
            let text = key.to_cursor().unwrap_or_else(|| "-".to_string());
            f.write_str(&text)?;
        }
        write!(f, ";{}", self.arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_text() {
        let cursor = SortCursor::new(vec![Value::Number(3.0)], 1);
        assert_eq!(cursor.to_string(), "sort:n3;1");
        assert_eq!(SortCursor::parse("sort:n3;1").unwrap(), Some(cursor));

        let cursor = SortCursor::new(vec![Value::from("a;b,c"), Value::Id(7), Value::Null], 42);
        let text = cursor.to_string();
        assert_eq!(SortCursor::parse(&text).unwrap(), Some(cursor));
    }

    #[test]
    fn test_null_cursor() {
        assert_eq!(SortCursor::parse("null:").unwrap(), None);
        assert_eq!(SortCursor::format(None), "null:");
    }

    #[test]
    fn test_bad_cursors() {
        for text in ["", "sort:", "sort:n3", "sort:n3;x", "sort:;4", "sort:q1;4", "top:n3;1"] {
            assert!(
                matches!(SortCursor::parse(text), Err(SortError::BadCursor(_))),
                "{}",
                text
            );
        }
    }
}
