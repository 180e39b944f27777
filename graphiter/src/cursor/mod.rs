// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cursor text format
//!
//! A frozen iterator is `set-spec[/position[/state]]`. The set-spec starts
//! with the iterator kind (`prefix:`, `vip:`, `idset:`, `or:`, `and:`)
//! followed by an optional `~` for backward iteration and the `low-high`
//! id range. Position is `-` (not started), `$` (exhausted) or the last id
//! produced. State is kind-specific; `st:<n>:<next>:<find>[:<check>]`
//! records statistics so a thawed iterator need not recompute them.
//!
//! Free text inside cursors is `%XX`-escaped outside `[A-Za-z0-9._+~*-]`,
//! which keeps `/ : , ; ( ) @` available as delimiters.

use crate::error::IterError;
use crate::iter::{Direction, IdRange, IteratorStats};
use crate::store::Id;
use nom::{
    bytes::complete::tag,
    character::complete::{alpha1, char, i64 as parse_i64, u64 as parse_u64},
    combinator::{all_consuming, map, opt},
    sequence::{preceded, separated_pair, tuple},
    IResult,
};
use std::fmt;
use std::ops::BitOr;

/// Which parts of an evaluation point to freeze
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeFlags {
    pub set: bool,
    pub position: bool,
    pub state: bool,
}

impl FreezeFlags {
    pub const SET: Self = Self {
        set: true,
        position: false,
        state: false,
    };
    pub const POSITION: Self = Self {
        set: false,
        position: true,
        state: false,
    };
    pub const STATE: Self = Self {
        set: false,
        position: false,
        state: true,
    };
    pub const ALL: Self = Self {
        set: true,
        position: true,
        state: true,
    };
}

impl BitOr for FreezeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            set: self.set || rhs.set,
            position: self.position || rhs.position,
            state: self.state || rhs.state,
        }
    }
}

/// Where an iterator stands in its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Start,
    /// The id most recently produced
    At(Id),
    End,
}

impl Position {
    pub fn parse(text: &str) -> Result<Self, IterError> {
        match text {
            "" | "-" => Ok(Position::Start),
            "$" => Ok(Position::End),
            digits => digits
                .parse::<Id>()
                .map(Position::At)
                .map_err(|_| IterError::cursor(format!("bad position '{}'", text))),
        }
    }

    /// Smallest id (largest when backward) that may still be produced
    pub fn resume_from(&self, range: IdRange, direction: Direction) -> Option<Id> {
        match self {
            Position::Start => range.first(direction),
            Position::At(id) => direction.step(*id).filter(|next| range.contains(*next)),
            Position::End => None,
        }
    }

    /// Clamp a find target so the iterator never rewinds
    pub fn clamp_find(&self, id: Id, direction: Direction) -> Option<Id> {
        match (self, direction) {
            (Position::Start, _) => Some(id),
            (Position::At(last), Direction::Forward) => {
                Some(id.max(last.checked_add(1)?))
            }
            (Position::At(last), Direction::Backward) => {
                Some(id.min(last.checked_sub(1)?))
            }
            (Position::End, _) => None,
        }
    }

    /// Whether every id still to come lies strictly beyond `value`
    /// in iteration order
    pub fn beyond(&self, value: Id, range: IdRange, direction: Direction) -> bool {
        match self.resume_from(range, direction) {
            None => true,
            Some(next) => match direction {
                Direction::Forward => next > value,
                Direction::Backward => next < value,
            },
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Start => f.write_str("-"),
            Position::At(id) => write!(f, "{}", id),
            Position::End => f.write_str("$"),
        }
    }
}

/// The three slash-separated parts of an iterator cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorParts<'a> {
    pub set: &'a str,
    pub position: Option<&'a str>,
    pub state: Option<&'a str>,
}

impl<'a> CursorParts<'a> {
    /// Split on top-level slashes; the state part may contain anything
    pub fn split(text: &'a str) -> Result<Self, IterError> {
        let mut depth = 0usize;
        let mut cuts = Vec::with_capacity(2);
        for (i, ch) in text.char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| IterError::cursor("unbalanced ')'"))?;
                }
                '/' if depth == 0 => {
                    cuts.push(i);
                    if cuts.len() == 2 {
                        break;
                    }
                }
                _ => {}
            }
        }

        let non_empty = |s: &'a str| if s.is_empty() { None } else { Some(s) };
        let parts = match cuts.as_slice() {
            [] => Self {
                set: text,
                position: None,
                state: None,
            },
            [a] => Self {
                set: &text[..*a],
                position: non_empty(&text[a + 1..]),
                state: None,
            },
            [a, b, ..] => Self {
                set: &text[..*a],
                position: non_empty(&text[a + 1..*b]),
                state: non_empty(&text[b + 1..]),
            },
        };
        if parts.set.is_empty() {
            return Err(IterError::cursor("empty set specification"));
        }
        Ok(parts)
    }
}

/// Join frozen parts, dropping trailing empty ones
pub fn assemble(set: String, position: Option<String>, state: Option<String>) -> String {
    match (position, state) {
        (None, None) => set,
        (Some(position), None) => format!("{}/{}", set, position),
        (position, Some(state)) => {
            format!("{}/{}/{}", set, position.unwrap_or_default(), state)
        }
    }
}

fn kind(input: &str) -> IResult<&str, &str> {
    let (rest, (name, _)) = tuple((alpha1, char(':')))(input)?;
    Ok((rest, name))
}

fn header(input: &str) -> IResult<&str, (Direction, Id, Id)> {
    map(
        tuple((opt(char('~')), separated_pair(parse_u64, char('-'), parse_u64))),
        |(tilde, (low, high))| {
            let direction = if tilde.is_some() {
                Direction::Backward
            } else {
                Direction::Forward
            };
            (direction, low, high)
        },
    )(input)
}

fn stats(input: &str) -> IResult<&str, IteratorStats> {
    map(
        preceded(
            tag("st:"),
            tuple((
                parse_u64,
                preceded(char(':'), parse_i64),
                preceded(char(':'), parse_i64),
                opt(preceded(char(':'), parse_i64)),
            )),
        ),
        |(n, next_cost, find_cost, check_cost)| IteratorStats {
            n,
            next_cost,
            find_cost,
            check_cost: check_cost.unwrap_or(find_cost),
        },
    )(input)
}

/// Split `kind:body` off a set-spec
pub fn split_kind(set: &str) -> Result<(&str, &str), IterError> {
    kind(set)
        .map(|(body, name)| (name, body))
        .map_err(|_| IterError::cursor(format!("missing iterator kind in '{}'", set)))
}

/// Parse the `[~]low-high` header of a set-spec body, returning the rest
/// after the following `:` (or the empty string)
pub fn parse_header(body: &str) -> Result<(Direction, IdRange, &str), IterError> {
    let (rest, (direction, low, high)) =
        header(body).map_err(|_| IterError::cursor(format!("bad range in '{}'", body)))?;
    let range = IdRange::new(low, high)?;
    let rest = match rest.strip_prefix(':') {
        Some(rest) => rest,
        None if rest.is_empty() => rest,
        None => return Err(IterError::cursor(format!("trailing text '{}'", rest))),
    };
    Ok((direction, range, rest))
}

pub fn format_header(direction: Direction, range: IdRange) -> String {
    let tilde = match direction {
        Direction::Forward => "",
        Direction::Backward => "~",
    };
    format!("{}{}-{}", tilde, range.low, range.high)
}

pub fn parse_stats(text: &str) -> Result<IteratorStats, IterError> {
    all_consuming(stats)(text)
        .map(|(_, stats)| stats)
        .map_err(|_| IterError::cursor(format!("bad statistics '{}'", text)))
}

pub fn format_stats(stats: &IteratorStats) -> String {
    format!(
        "st:{}:{}:{}:{}",
        stats.n, stats.next_cost, stats.find_cost, stats.check_cost
    )
}

/// Split `(a)(b)(c)` into its top-level groups
pub fn split_groups(text: &str) -> Result<Vec<&str>, IterError> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut open = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    open = i + 1;
                }
                depth += 1;
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| IterError::cursor("unbalanced ')'"))?;
                if depth == 0 {
                    groups.push(&text[open..i]);
                }
            }
            _ if depth == 0 => {
                return Err(IterError::cursor(format!(
                    "unexpected '{}' between groups",
                    ch
                )))
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(IterError::cursor("unterminated group"));
    }
    Ok(groups)
}

fn unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'+' | b'~' | b'*' | b'-')
}

/// Escape free text for embedding in a cursor
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

pub fn unescape(text: &str) -> Result<String, IterError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text
                .get(i + 1..i + 3)
                .ok_or_else(|| IterError::cursor("truncated escape"))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| IterError::cursor(format!("bad escape '%{}'", hex)))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| IterError::cursor("escaped text is not UTF-8"))
}

/// Parse a comma-separated id list
pub fn parse_ids(text: &str) -> Result<Vec<Id>, IterError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|s| {
            s.parse::<Id>()
                .map_err(|_| IterError::cursor(format!("bad id '{}'", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_cursor_parts() {
        let parts = CursorParts::split("or:0-10:(idset:0-10:1,2)(idset:0-10:3)/2/st:3:1:2").unwrap();
        assert_eq!(parts.set, "or:0-10:(idset:0-10:1,2)(idset:0-10:3)");
        assert_eq!(parts.position, Some("2"));
        assert_eq!(parts.state, Some("st:3:1:2"));

        // Nested cursors in the state part keep their slashes
        let parts = CursorParts::split("vip:0-9:left+2->1/5/idset:0-9:5,6/5/").unwrap();
        assert_eq!(parts.state, Some("idset:0-9:5,6/5/"));

        let parts = CursorParts::split("idset:0-4:1").unwrap();
        assert_eq!(parts.position, None);
        assert!(CursorParts::split("/3").is_err());
    }

    #[test]
    fn test_assemble_drops_trailing_parts() {
        assert_eq!(assemble("a:".into(), None, None), "a:");
        assert_eq!(assemble("a:".into(), Some("3".into()), None), "a:/3");
        assert_eq!(assemble("a:".into(), None, Some("st".into())), "a://st");
    }

    #[test]
    fn test_header() {
        let (dir, range, rest) = parse_header("~5-20:abc").unwrap();
        assert_eq!(dir, Direction::Backward);
        assert_eq!((range.low, range.high), (5, 20));
        assert_eq!(rest, "abc");

        assert_eq!(format_header(Direction::Backward, range), "~5-20");
        assert!(parse_header("20-5:x").is_err());
        assert!(parse_header("x-5").is_err());
    }

    #[test]
    fn test_stats_text() {
        let stats = parse_stats("st:12:3:4").unwrap();
        assert_eq!(stats.n, 12);
        assert_eq!(stats.check_cost, 4);
        assert_eq!(parse_stats(&format_stats(&stats)).unwrap(), stats);
        assert!(parse_stats("st:12:3").is_err());
        assert!(parse_stats("st:1:2:3:4:5").is_err());
    }

    #[test]
    fn test_escape_keeps_delimiters_free() {
        let escaped = escape("a/b:c (d), é");
        assert!(!escaped.contains(&['/', ':', '(', ')', ',', ' '][..]));
        assert_eq!(unescape(&escaped).unwrap(), "a/b:c (d), é");
        assert_eq!(escape("ab.c-d*"), "ab.c-d*");
        assert!(unescape("%4").is_err());
        assert!(unescape("%zz").is_err());
    }

    #[test]
    fn test_groups() {
        assert_eq!(split_groups("(a)(b(c))").unwrap(), vec!["a", "b(c)"]);
        assert!(split_groups("").unwrap().is_empty());
        assert!(split_groups("(a").is_err());
        assert!(split_groups("(a)x").is_err());
    }

    #[test]
    fn test_position_helpers() {
        let range = IdRange::new(0, 10).unwrap();
        assert_eq!(Position::parse("-").unwrap(), Position::Start);
        assert_eq!(Position::parse("7").unwrap(), Position::At(7));
        assert!(Position::parse("x").is_err());

        assert_eq!(Position::At(3).resume_from(range, Direction::Forward), Some(4));
        assert_eq!(Position::At(9).resume_from(range, Direction::Forward), None);
        assert_eq!(Position::Start.resume_from(range, Direction::Backward), Some(9));
        assert_eq!(Position::At(5).clamp_find(2, Direction::Forward), Some(6));
        assert_eq!(Position::At(5).clamp_find(2, Direction::Backward), Some(2));
        assert!(Position::At(4).beyond(3, range, Direction::Forward));
        assert!(!Position::At(4).beyond(5, range, Direction::Forward));
        assert!(Position::End.beyond(0, range, Direction::Forward));
    }

    #[test]
    fn test_id_list() {
        assert_eq!(parse_ids("1,5,9").unwrap(), vec![1, 5, 9]);
        assert!(parse_ids("").unwrap().is_empty());
        assert!(parse_ids("1,,2").is_err());
    }
}
