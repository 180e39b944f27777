// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::commands::OutputFormat;
use super::output::{PageReport, ResultFormatter};
use graphiter::{
    compile, thaw, Budget, Constraint, Direction, EngineConfig, EvalEnv, FreezeFlags, IndexStore,
    MemoryStore, PagedQuery, PrimitiveProjector, QuerySpec, Resume, SortKey,
};

/// Arguments of the `query` command
pub struct QueryArgs {
    pub data: PathBuf,
    pub constraint: String,
    pub sort: Option<String>,
    pub page: usize,
    pub start: usize,
    pub cursor: Option<String>,
    pub reverse: bool,
    pub budget: Option<i64>,
    pub format: OutputFormat,
    pub config: Option<PathBuf>,
}

/// Build an environment over a JSON dataset
///
/// Every invocation is a fresh process, so stamped cursors could never be
/// thawed again: the ticket caches are always disabled here.
fn load_env(data: &Path, config: Option<&Path>) -> Result<EvalEnv, Box<dyn std::error::Error>> {
    let mut config = match config {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    config.ticket_cache.enabled = false;
    config.validate()?;

    let text = std::fs::read_to_string(data)
        .map_err(|e| format!("Failed to read dataset {:?}: {}", data, e))?;
    let store = MemoryStore::from_json(&text)?;
    log::info!("Loaded {} primitives from {:?}", store.len(), data);

    let store: Arc<dyn IndexStore> = Arc::new(store);
    Ok(EvalEnv::new(store, config))
}

/// Handle the query command
pub fn handle_query(args: QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let env = load_env(&args.data, args.config.as_deref())?;

    let constraint = Constraint::from_json(&args.constraint)?;
    let sort = match &args.sort {
        Some(text) => SortKey::parse_list(text)?,
        None => Vec::new(),
    };
    let direction = if args.reverse {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let turn_budget = args.budget.unwrap_or(env.config.query.turn_budget);
    if turn_budget <= 0 {
        return Err("Budget must be > 0".into());
    }

    let iter = compile(&constraint, &env, None, direction, &mut Budget::unlimited())?;
    let spec = QuerySpec::page(args.page)
        .with_start(args.start)
        .with_sort(sort.clone())
        .with_cursor(args.cursor);
    let mut query = PagedQuery::new(iter, spec, PrimitiveProjector::new(&env), &env)?;

    let page = loop {
        match query.run(&mut Budget::new(turn_budget))? {
            Resume::Done(page) => break page,
            Resume::Suspended => continue,
        }
    };
    let source_cursor = query.freeze_source(FreezeFlags::ALL)?;

    let report = PageReport {
        page: &page,
        sort: &sort,
        source_cursor: &source_cursor,
    };
    print!("{}", ResultFormatter::format(&report, args.format));
    Ok(())
}

/// Handle the thaw command
pub fn handle_thaw(data: PathBuf, cursor: String, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let env = load_env(&data, None)?;
    let mut iter = thaw(&cursor, &env)?;

    println!(
        "{} {} iterator over {}-{} ({})",
        "Thawed".bold().green(),
        iter.kind(),
        iter.range().low,
        iter.range().high,
        if iter.direction().is_forward() {
            "forward"
        } else {
            "backward"
        }
    );

    let mut ids = Vec::new();
    let mut budget = Budget::new(env.config.query.turn_budget);
    while ids.len() < limit {
        match iter.next(&mut budget)? {
            Resume::Done(Some(id)) => ids.push(id),
            Resume::Done(None) => break,
            Resume::Suspended => budget.refill(env.config.query.turn_budget),
        }
    }

    if ids.is_empty() {
        println!("{}", "No ids remaining".yellow());
    } else {
        let text: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        println!("{}", text.join(" "));
        if ids.len() == limit {
            println!("{}", format!("(stopped after {} ids)", limit).dimmed());
        }
    }
    Ok(())
}
