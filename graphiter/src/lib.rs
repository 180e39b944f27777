// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Graphiter - budgeted, resumable query evaluation for graph stores
//!
//! Graphiter is the evaluation core that sits between a constraint compiler
//! and a cooperative request scheduler. It turns constraints into lazy id
//! sets, drives them a bounded amount per scheduler turn, sorts their output
//! incrementally into pages, and freezes evaluation points into short cursor
//! strings that can be thawed on a later request.
//!
//! # Features
//!
//! - **Budgeted iterators**: every operation consumes a cost budget and can
//!   suspend with its call state intact ([`Resume::Suspended`])
//! - **Prefix / VIP / IDSet variants**: short-prefix unions with a shared
//!   result cache, provenance-carrying linkage iterators, and lazily
//!   recovered in-memory sets
//! - **Ticket caches**: content-addressed LRU caches that keep cursors short
//! - **Incremental sort**: an O(n log P) top-K sort producing one resumable
//!   page at a time
//!
//! # Usage
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::from_primitives(primitives));
//! let env = EvalEnv::new(store, EngineConfig::default());
//! let constraint = Constraint::Glob { pattern: "ab*".into() };
//! let mut budget = Budget::new(env.config.query.turn_budget);
//! let iter = compile(&constraint, &env, None, Direction::Forward, &mut budget)?;
//! let mut query = PagedQuery::new(iter, QuerySpec::page(10), PrimitiveProjector::new(&env), &env)?;
//! loop {
//!     let mut budget = Budget::new(env.config.query.turn_budget);
//!     if let Resume::Done(page) = query.run(&mut budget)? {
//!         break page;
//!     }
//! }
//! ```

pub mod budget;
pub mod builder;
pub mod cache;
pub mod compare;
pub mod config;
pub mod cursor;
pub mod env;
pub mod error;
pub mod iter;
pub mod query;
pub mod sort;
pub mod store;
pub mod value;

pub use budget::{Budget, IterResult, Resume};
pub use builder::{compile, Constraint};
pub use cache::{CursorCaches, IdSetCache, ResourceCache, StateCache, Ticket};
pub use compare::{comparator, default_comparator, Comparator, DefaultComparator};
pub use config::EngineConfig;
pub use cursor::FreezeFlags;
pub use env::EvalEnv;
pub use error::{CacheError, IterError, SortError};
pub use iter::{thaw, Direction, IdRange, SetIterator};
pub use query::{Page, PageRow, PagedQuery, PrimitiveProjector, Projector, QuerySpec};
pub use sort::{IncrementalSort, SortCursor, SortDirection, SortKey, SortStats};
pub use store::{Id, IndexStore, Linkage, MemoryStore, Primitive};
pub use value::Value;

/// Graphiter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Graphiter crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
