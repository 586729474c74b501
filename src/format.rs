//! Output formatting for fetched row sets.

use crate::error::{DbError, DbResult};
use crate::models::{ExecuteOutput, RowSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for execute results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// ASCII table format (like MySQL CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the result of one `execute` call.
pub fn render(output: &ExecuteOutput, format: OutputFormat, elapsed_ms: u64) -> DbResult<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(output)
            .map_err(|e| DbError::internal(format!("Failed to serialize result: {e}"))),
        OutputFormat::Table => Ok(output
            .row_sets()
            .iter()
            .map(|rows| format_as_table(rows, elapsed_ms))
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Markdown => Ok(output
            .row_sets()
            .iter()
            .map(format_as_markdown)
            .collect::<Vec<_>>()
            .join("\n\n")),
    }
}

pub fn format_as_table(rows: &RowSet, execution_time_ms: u64) -> String {
    if rows.columns.is_empty() {
        return format!(
            "Empty set ({:.2} sec)\n",
            execution_time_ms as f64 / 1000.0
        );
    }

    let mut widths: Vec<usize> = rows.columns.iter().map(|c| c.width()).collect();
    for row in &rows.rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(format_value(value).width());
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = rows
        .columns
        .iter()
        .zip(&widths)
        .map(|(name, w)| format!("| {} ", pad(name, *w, Align::Center)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &rows.rows {
        let row_str: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let value = row.get(i).unwrap_or(&JsonValue::Null);
                let align = if value.is_number() {
                    Align::Right
                } else {
                    Align::Left
                };
                format!("| {} ", pad(&format_value(value), *w, align))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_count = rows.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        row_count,
        row_text,
        execution_time_ms as f64 / 1000.0
    ));

    output
}

pub fn format_as_markdown(rows: &RowSet) -> String {
    if rows.columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let mut output = String::new();

    let header: String = rows
        .columns
        .iter()
        .map(|c| format!("| {} ", c))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = rows.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &rows.rows {
        let row_str: String = row
            .iter()
            .map(|value| format!("| {} ", format_value(value).replace('|', "\\|")))
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} rows*", rows.row_count()));

    output
}

enum Align {
    Left,
    Right,
    Center,
}

/// Pad by display width; `format!` width counts chars, which misaligns CJK text.
fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = width.saturating_sub(text.width());
    match align {
        Align::Left => format!("{}{}", text, " ".repeat(fill)),
        Align::Right => format!("{}{}", " ".repeat(fill), text),
        Align::Center => {
            let left = fill / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(fill - left))
        }
    }
}
