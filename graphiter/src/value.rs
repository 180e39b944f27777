// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sort-key values

use crate::compare::Comparator;
use crate::cursor::{escape, split_groups, unescape};
use crate::store::Id;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A value a result row is sorted by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Id(Id),
    List(Vec<Value>),
    /// Not yet computed; must be resolved before it can be compared
    Deferred,
}

impl Value {
    /// Extract as id if possible
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Value::Id(id) => Some(*id),
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64 => {
                Some(*n as Id)
            }
            _ => None,
        }
    }

    /// Extract as string if possible
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True if this value or any nested value is still deferred
    pub fn is_deferred(&self) -> bool {
        match self {
            Value::Deferred => true,
            Value::List(items) => items.iter().any(Value::is_deferred),
            _ => false,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
            Value::Id(_) => 4,
            Value::List(_) => 5,
            Value::Deferred => 6,
        }
    }

    /// Total order: values of different types order by type, text through
    /// the comparator, lists lexicographically
    pub fn compare(&self, other: &Value, comparator: &dyn Comparator) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Deferred, Value::Deferred) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => comparator.compare(a, b),
            (Value::Id(a), Value::Id(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y, comparator);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Cursor encoding; deferred values cannot be encoded
    pub fn to_cursor(&self) -> Option<String> {
        Some(match self {
            Value::Null => "-".to_string(),
            Value::Bool(true) => "t".to_string(),
            Value::Bool(false) => "f".to_string(),
            Value::Number(n) => format!("n{}", escape(&n.to_string())),
            Value::Text(s) => format!("s{}", escape(s)),
            Value::Id(id) => format!("i{}", id),
            Value::List(items) => {
                let mut out = String::from("l");
                for item in items {
                    out.push('(');
                    out.push_str(&item.to_cursor()?);
                    out.push(')');
                }
                out
            }
            Value::Deferred => return None,
        })
    }

    pub fn from_cursor(text: &str) -> Result<Value, String> {
        let mut chars = text.chars();
        let tag = chars.next().ok_or_else(|| "empty value".to_string())?;
        let body = chars.as_str();
        match tag {
            '-' if body.is_empty() => Ok(Value::Null),
            't' if body.is_empty() => Ok(Value::Bool(true)),
            'f' if body.is_empty() => Ok(Value::Bool(false)),
            'n' => unescape(body)
                .map_err(|e| e.to_string())?
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| format!("bad number '{}'", body)),
            's' => unescape(body).map(Value::Text).map_err(|e| e.to_string()),
            'i' => body
                .parse::<Id>()
                .map(Value::Id)
                .map_err(|_| format!("bad id '{}'", body)),
            'l' => split_groups(body)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(Value::from_cursor)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            _ => Err(format!("bad value '{}'", text)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Id(id) => write!(f, "#{}", id),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Deferred => write!(f, "<deferred>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::DefaultComparator;

    #[test]
    fn test_cross_type_order() {
        let cmp = DefaultComparator;
        assert_eq!(Value::Null.compare(&Value::Number(-5.0), &cmp), Ordering::Less);
        assert_eq!(Value::Text("a".into()).compare(&Value::Number(9.0), &cmp), Ordering::Greater);
        assert_eq!(Value::from("B").compare(&Value::from("a"), &cmp), Ordering::Greater);
    }

    #[test]
    fn test_list_order() {
        let cmp = DefaultComparator;
        let short = Value::List(vec![Value::Number(1.0)]);
        let long = Value::List(vec![Value::Number(1.0), Value::Null]);
        assert_eq!(short.compare(&long, &cmp), Ordering::Less);
    }

    #[test]
    fn test_deferred_detection() {
        assert!(Value::Deferred.is_deferred());
        assert!(Value::List(vec![Value::Null, Value::Deferred]).is_deferred());
        assert!(!Value::List(vec![Value::Null]).is_deferred());
        assert_eq!(Value::Deferred.to_cursor(), None);
    }

    #[test]
    fn test_cursor_encoding_of_awkward_values() {
        let value = Value::List(vec![
            Value::Text("a,b;(c)/d".into()),
            Value::Number(-2.5),
            Value::Id(17),
            Value::Null,
        ]);
        let text = value.to_cursor().unwrap();
        assert!(!text.contains(',') && !text.contains(';') && !text.contains('/'));
        assert_eq!(Value::from_cursor(&text).unwrap(), value);
        assert!(Value::from_cursor("q1").is_err());
        assert!(Value::from_cursor("").is_err());
    }

    #[test]
    fn test_as_id() {
        assert_eq!(Value::Id(4).as_id(), Some(4));
        assert_eq!(Value::Number(4.0).as_id(), Some(4));
        assert_eq!(Value::Number(4.5).as_id(), None);
        assert_eq!(Value::from("4").as_id(), None);
    }
}
