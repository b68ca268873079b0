use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command summary printable in every [`OutputFormat`].
pub trait Report: Serialize {
    /// Field name and rendered value, in display order.
    fn rows(&self) -> Vec<(&'static str, String)>;
}

#[derive(Debug, Serialize)]
pub struct ClientReport {
    pub endpoint: String,
    pub connections: usize,
    pub bytes_per_connection: usize,
    pub total_bytes: u64,
    pub elapsed_ms: f64,
    pub result: &'static str,
}

impl Report for ClientReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("endpoint", self.endpoint.clone()),
            ("connections", self.connections.to_string()),
            ("bytes_per_connection", self.bytes_per_connection.to_string()),
            ("total_bytes", self.total_bytes.to_string()),
            ("elapsed_ms", format!("{:.3}", self.elapsed_ms)),
            ("result", self.result.to_string()),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct ServeReport {
    pub endpoint: String,
    pub connections: usize,
    pub failed: usize,
    pub bytes_per_connection: usize,
}

impl Report for ServeReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("endpoint", self.endpoint.clone()),
            ("connections", self.connections.to_string()),
            ("failed", self.failed.to_string()),
            ("bytes_per_connection", self.bytes_per_connection.to_string()),
        ]
    }
}

pub fn print_report(report: &impl Report, format: OutputFormat) {
    println!("{}", render(report, format));
}

fn render(report: &impl Report, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in report.rows() {
                table.add_row(vec![field.to_string(), value]);
            }
            table.to_string()
        }
        OutputFormat::Pretty => report
            .rows()
            .into_iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}
