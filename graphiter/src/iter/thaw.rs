// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reconstructing iterators from cursor text
//!
//! The set-spec names the iterator kind and is always required. A missing
//! position means "not started". State, when present, is first resolved
//! through the state cache (`@stamp`, `@x<literal>`) and then interpreted
//! by the kind: statistics for most kinds, a nested sub-iterator cursor
//! for VIP iterators.

use crate::budget::Budget;
use crate::cursor::{parse_header, parse_stats, split_groups, split_kind, unescape, CursorParts, Position};
use crate::env::EvalEnv;
use crate::error::IterError;
use crate::iter::{
    AndIterator, IdSetIterator, IteratorStats, PrefixIterator, SetIterator, UnionIterator,
    VipIterator,
};

/// Thaw a complete `set[/position[/state]]` cursor
pub fn thaw(text: &str, env: &EvalEnv) -> Result<Box<dyn SetIterator>, IterError> {
    let parts = CursorParts::split(text)?;
    thaw_parts(parts.set, parts.position, parts.state, env)
}

/// Thaw from separately stored cursor parts
pub fn thaw_parts(
    set: &str,
    position: Option<&str>,
    state: Option<&str>,
    env: &EvalEnv,
) -> Result<Box<dyn SetIterator>, IterError> {
    let position = match position {
        Some(text) => Position::parse(text)?,
        None => Position::Start,
    };
    let state = match state {
        Some(text) => Some(env.caches.decode_state(text)?),
        None => None,
    };
    let stats = || -> Result<Option<IteratorStats>, IterError> {
        state.as_deref().map(parse_stats).transpose()
    };

    let (kind, body) = split_kind(set)?;
    let (direction, range, rest) = parse_header(body)?;

    let iter = match kind {
        "idset" => IdSetIterator::thaw_body(rest, range, direction, &env.caches)?
            .with_position(position)
            .with_stats(stats()?)
            .boxed(),
        "prefix" => {
            let prefix = unescape(rest)?;
            PrefixIterator::new(env.store.clone(), &prefix, range, direction, &env.config.prefix)
                .resume_at(position, stats()?)
                .boxed()
        }
        "vip" => {
            let (role, endpoint, type_id) = VipIterator::parse_body(rest)?;
            match state.as_deref() {
                Some(nested) => {
                    let sub = thaw(nested, env)?;
                    if sub.range() != range || sub.direction() != direction {
                        return Err(IterError::cursor("vip sub-iterator disagrees with its range"));
                    }
                    VipIterator::wrap(env.store.clone(), role, endpoint, type_id, sub).boxed()
                }
                None => VipIterator::create_at(
                    env.store.clone(),
                    (role, endpoint, type_id),
                    range,
                    direction,
                    position,
                    &env.config.vip,
                    &mut Budget::unlimited(),
                )?
                .boxed(),
            }
        }
        "or" | "and" => {
            let children = split_groups(rest)?
                .into_iter()
                .map(|group| thaw_parts(group, None, None, env))
                .collect::<Result<Vec<_>, _>>()?;
            if kind == "or" {
                UnionIterator::new(children, range, direction)
                    .resume_at(position, stats()?)
                    .boxed()
            } else {
                AndIterator::new(children, range, direction)?
                    .resume_at(position, stats()?)
                    .boxed()
            }
        }
        other => return Err(IterError::cursor(format!("unknown iterator kind '{}'", other))),
    };
    Ok(iter)
}
