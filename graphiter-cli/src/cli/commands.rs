// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line arguments

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "graphiter", about = "Graphiter query evaluation driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<log::Level>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Fetch one page of a constraint's results
    Query {
        /// JSON dataset (`{"config": {...}, "primitives": [...]}`)
        #[arg(short, long)]
        data: PathBuf,

        /// Constraint as JSON, e.g. '{"op": "glob", "pattern": "ap*"}'
        #[arg(short, long)]
        constraint: String,

        /// Sort keys: field[:asc|desc][:comparator], comma separated
        #[arg(short, long)]
        sort: Option<String>,

        /// Rows per page
        #[arg(short, long, default_value_t = 20)]
        page: usize,

        /// Rows to skip before the page
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Continuation printed by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Iterate in descending id order
        #[arg(long)]
        reverse: bool,

        /// Cost allowance per cooperative turn
        #[arg(short, long)]
        budget: Option<i64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the ids an iterator cursor resumes to
    Thaw {
        /// JSON dataset the cursor was produced against
        #[arg(short, long)]
        data: PathBuf,

        /// Iterator cursor
        cursor: String,

        /// Maximum number of ids to print
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
