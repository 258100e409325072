//! Markdown and JSON rendering of query results.

use crate::analysis::summarize;
use crate::models::{AgentKind, AgentStatus, DataRow, ErrorEntry, QueryResult};
use crate::server::QueryEnvelope;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Rows shown per agent in the Markdown report.
const MAX_TABLE_ROWS: usize = 25;

/// Context printed at the top of a report.
#[derive(Debug, Clone)]
pub struct ReportMetadata {
    pub query: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub duration_seconds: f64,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(result: &QueryResult, metadata: &ReportMetadata) -> String {
    let mut output = String::new();

    output.push_str("# SitePulse Report\n\n");
    output.push_str(&generate_metadata_section(metadata, result));
    output.push_str(&generate_answer_section(result));
    output.push_str(&generate_summary_section(result));
    output.push_str(&generate_data_section(result));
    output.push_str(&generate_errors_section(&result.errors));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata, result: &QueryResult) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Query:** {}\n", metadata.query));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    let agents: Vec<&str> = result.agents_used.iter().map(AgentKind::label).collect();
    section.push_str(&format!("- **Agents:** {}\n", agents.join(", ")));
    section.push_str(&format!("- **Duration:** {:.1}s\n", metadata.duration_seconds));
    if result.degraded {
        section.push_str("- **Degraded:** yes\n");
    }
    if result.deadline_exceeded {
        section.push_str("- **Deadline Exceeded:** yes\n");
    }
    section.push('\n');

    section
}

fn generate_answer_section(result: &QueryResult) -> String {
    let mut section = String::from("## Answer\n\n");

    if result.narrative.is_empty() {
        section.push_str("_No agent produced an answer._\n\n");
    } else {
        // Agent headings move one level down under "Answer".
        for line in result.narrative.lines() {
            if let Some(rest) = line.strip_prefix("## ") {
                section.push_str("### ");
                section.push_str(rest);
            } else {
                section.push_str(line);
            }
            section.push('\n');
        }
        section.push('\n');
    }

    section
}

fn generate_summary_section(result: &QueryResult) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Agent | Status | Model Turns | Tool Calls | Rows | Errors |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|\n");

    for summary in summarize(result) {
        let status = match summary.status {
            AgentStatus::Completed => "✅ completed",
            AgentStatus::Failed => "❌ failed",
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            summary.kind, status, summary.iterations, summary.tool_calls, summary.rows, summary.errors
        ));
    }
    section.push('\n');

    section
}

fn generate_data_section(result: &QueryResult) -> String {
    if result.data.is_empty() {
        return String::new();
    }

    let mut section = String::from("## Data\n\n");

    for (kind, rows) in &result.data {
        section.push_str(&format!("### {} ({} rows)\n\n", kind, rows.len()));
        section.push_str(&generate_rows_table(rows));

        if rows.len() > MAX_TABLE_ROWS {
            section.push_str(&format!(
                "_{} more rows omitted; use `--format json` for the full data._\n\n",
                rows.len() - MAX_TABLE_ROWS
            ));
        }
    }

    section
}

/// One table per agent. Columns are the union of row keys in first-seen
/// order, followed by the call that produced the row.
fn generate_rows_table(rows: &[DataRow]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.values.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut table = String::new();
    table.push_str(&format!("| {} | Source |\n", columns.join(" | ")));
    table.push_str(&format!("|{}:---|\n", ":---|".repeat(columns.len())));

    for row in rows.iter().take(MAX_TABLE_ROWS) {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.values.get(*c).map(format_cell).unwrap_or_default())
            .collect();
        table.push_str(&format!(
            "| {} | `{}` {} |\n",
            cells.join(" | "),
            row.source.tool,
            row.source.call_id
        ));
    }
    table.push('\n');

    table
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace('|', "\\|"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn generate_errors_section(errors: &[ErrorEntry]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut section = String::from("## Errors\n\n");

    for error in errors {
        let agent = error.agent.map(|a| a.label()).unwrap_or("-");
        let code = error.code.map(|c| c.as_str()).unwrap_or("-");
        let mut line = format!("- **{}** `{}` ({})", agent, code, error.message);
        if let (Some(tool), Some(call_id)) = (&error.tool, &error.call_id) {
            line.push_str(&format!(" in `{}` {}", tool, call_id));
        }
        section.push_str(&line);
        section.push('\n');
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n_Generated by SitePulse._\n".to_string()
}

/// Serialize the result the way `POST /query` returns it.
pub fn generate_json_report(result: &QueryResult) -> Result<String> {
    let envelope = QueryEnvelope::from(result);
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Write a report to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
