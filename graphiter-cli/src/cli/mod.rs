// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for Graphiter
//!
//! Runs paged queries and thaws cursors against a JSON dataset loaded into
//! the in-memory store.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_query, handle_thaw, QueryArgs};
