// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Graphiter CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // RUST_LOG still overrides
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "Graphiter".bold().green(), graphiter::VERSION);
            println!("Budgeted set iterators and incremental top-K sort");
            Ok(())
        }

        Commands::Query {
            data,
            constraint,
            sort,
            page,
            start,
            cursor,
            reverse,
            budget,
            format,
            config,
        } => cli::handle_query(cli::QueryArgs {
            data,
            constraint,
            sort,
            page,
            start,
            cursor,
            reverse,
            budget,
            format,
            config,
        }),

        Commands::Thaw {
            data,
            cursor,
            limit,
        } => cli::handle_thaw(data, cursor, limit),
    }
}
