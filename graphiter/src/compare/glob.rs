// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Glob patterns: `*` matches any sequence, `?` one character, `\` escapes
//!
//! Patterns compile to an anchored regex, so matching is linear in the text.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GlobToken {
    Any,
    One,
    Literal(char),
}

/// Literal head of a glob and what follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobPrefix {
    /// No wildcards at all
    Exact(String),
    /// A literal followed only by `*`
    Prefix(String),
    /// Wildcards appear inside; the literal head bounds the matches
    Complex(String),
}

impl GlobPrefix {
    pub fn literal(&self) -> &str {
        match self {
            GlobPrefix::Exact(s) | GlobPrefix::Prefix(s) | GlobPrefix::Complex(s) => s,
        }
    }
}

pub(crate) fn tokenize<F: Fn(char) -> char>(pattern: &str, fold: F) -> Vec<GlobToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let token = match ch {
            '*' => GlobToken::Any,
            '?' => GlobToken::One,
            // A trailing backslash matches itself
            '\\' => GlobToken::Literal(fold(chars.next().unwrap_or('\\'))),
            other => GlobToken::Literal(fold(other)),
        };
        // Collapse runs of `*`
        if token == GlobToken::Any && tokens.last() == Some(&GlobToken::Any) {
            continue;
        }
        tokens.push(token);
    }
    tokens
}

pub(crate) fn prefix_of(tokens: &[GlobToken]) -> GlobPrefix {
    let literal: String = tokens
        .iter()
        .map_while(|t| match t {
            GlobToken::Literal(c) => Some(*c),
            _ => None,
        })
        .collect();
    let head = literal.chars().count();
    let rest = &tokens[head..];

    if rest.is_empty() {
        GlobPrefix::Exact(literal)
    } else if rest == [GlobToken::Any] {
        GlobPrefix::Prefix(literal)
    } else {
        GlobPrefix::Complex(literal)
    }
}

/// Compiled glob, matched against already folded text
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    pub(crate) fn new(tokens: &[GlobToken]) -> Result<Self, regex::Error> {
        let mut pattern = String::from("^(?s:");
        let mut literal = String::new();
        for token in tokens {
            if let GlobToken::Literal(ch) = token {
                literal.push(*ch);
                continue;
            }
            pattern.push_str(&regex::escape(&literal));
            literal.clear();
            pattern.push_str(match token {
                GlobToken::Any => ".*",
                _ => ".",
            });
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push_str(")$");
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn is_match(&self, folded: &str) -> bool {
        self.regex.is_match(folded)
    }
}
