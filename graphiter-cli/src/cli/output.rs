// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Page formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use graphiter::{Page, Primitive, PrimitiveProjector, SortKey, Value};

use super::commands::OutputFormat;

/// Primitive fields shown for every row
const COLUMNS: &[&str] = &["id", "name", "value", "type", "scope", "left", "right"];

/// A page together with what is needed to present it
pub struct PageReport<'a> {
    pub page: &'a Page<Primitive>,
    pub sort: &'a [SortKey],
    /// Where the source iterator stopped
    pub source_cursor: &'a str,
}

/// Result formatter for the supported output formats
pub struct ResultFormatter;

impl ResultFormatter {
    pub fn format(report: &PageReport<'_>, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(report),
            OutputFormat::Json => Self::format_json(report),
        }
    }

    fn format_table(report: &PageReport<'_>) -> String {
        let page = report.page;
        let mut output = String::new();

        if page.rows.is_empty() {
            output.push_str(&format!("{}\n", "No results found".yellow()));
        } else {
            output.push_str(&format!("{}\n", "Query Results".bold().green()));
            output.push_str(&format!("Rows returned: {}\n\n", page.rows.len()));

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);

            let mut header: Vec<Cell> = COLUMNS.iter().map(|col| Cell::new(col).fg(Color::Green)).collect();
            header.extend(
                report
                    .sort
                    .iter()
                    .map(|key| Cell::new(format!("sort {}", key)).fg(Color::Cyan)),
            );
            table.set_header(header);

            for row in &page.rows {
                let mut cells: Vec<String> = COLUMNS
                    .iter()
                    .map(|col| Self::value_to_string(&PrimitiveProjector::field(&row.row, col)))
                    .collect();
                cells.extend(row.keys.iter().map(Self::value_to_string));
                table.add_row(cells);
            }

            output.push_str(&table.to_string());
            output.push('\n');
        }

        output.push_str(&format!("\nTurns: {}\n", page.turns));
        match &page.cursor {
            Some(cursor) => output.push_str(&format!("{} {}\n", "Next page:".bold(), cursor.cyan())),
            None => output.push_str(&format!("{}\n", "Last page".dimmed())),
        }
        output.push_str(&format!("{} {}\n", "Source cursor:".bold(), report.source_cursor));

        if let Some(stats) = &page.sort_stats {
            output.push_str(&format!(
                "Sort: {} arrivals, {} stored, {} condenses, {:.0}% discarded early\n",
                stats.arrivals,
                stats.accepted,
                stats.condenses,
                stats.discard_ratio() * 100.0
            ));
        }
        output
    }

    fn format_json(report: &PageReport<'_>) -> String {
        let page = report.page;
        let rows: Vec<serde_json::Value> = page
            .rows
            .iter()
            .map(|row| {
                let mut map = serde_json::Map::new();
                for col in COLUMNS {
                    map.insert(
                        col.to_string(),
                        Self::value_to_json(&PrimitiveProjector::field(&row.row, col)),
                    );
                }
                if !row.keys.is_empty() {
                    map.insert(
                        "sort".to_string(),
                        serde_json::Value::Array(row.keys.iter().map(Self::value_to_json).collect()),
                    );
                }
                serde_json::Value::Object(map)
            })
            .collect();

        let mut json = serde_json::json!({
            "status": "success",
            "rows": rows,
            "cursor": page.cursor,
            "source_cursor": report.source_cursor,
            "turns": page.turns,
        });
        if let (Some(stats), serde_json::Value::Object(map)) = (&page.sort_stats, &mut json) {
            map.insert(
                "sort".to_string(),
                serde_json::json!({
                    "keys": report.sort.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
                    "arrivals": stats.arrivals,
                    "prefilter_rejects": stats.prefilter_rejects,
                    "accepted": stats.accepted,
                    "rejected": stats.rejected,
                    "deferred": stats.deferred,
                    "condenses": stats.condenses,
                }),
            );
        }

        let mut text = serde_json::to_string_pretty(&json).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize results to JSON\"}".to_string()
        });
        text.push('\n');
        text
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }

    fn value_to_json(value: &Value) -> serde_json::Value {
        match value {
            Value::Null | Value::Deferred => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Id(id) => serde_json::Value::from(*id),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Self::value_to_json).collect()),
        }
    }
}
