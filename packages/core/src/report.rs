//! Report model and terminal rendering.
//!
//! Aggregators produce a [`Report`]; the CLI renders it either as a bordered,
//! left-aligned table or as JSON. Progress lines go to stderr so stdout only
//! ever carries the report.

use crate::fanout::ProgressFn;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

/// Ordered rows of display fields under a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Report {
    pub fn new(title: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            title: title.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as a bordered table. `color` bolds the header row.
    pub fn render_table(&self, color: bool) -> String {
        let widths = self.column_widths();
        let border = border_line(&widths);

        let mut out = String::new();
        out.push_str(&border);
        out.push('\n');
        out.push_str(&format_row(&self.columns, &widths, color));
        out.push('\n');
        out.push_str(&border);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&format_row(row, &widths, false));
            out.push('\n');
        }
        out.push_str(&border);
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| display_width(c)).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let width = display_width(cell);
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(width),
                    None => widths.push(width),
                }
            }
        }
        widths
    }
}

/// Terminal columns taken by `s` (wide CJK and emoji count as two).
fn display_width(s: &str) -> usize {
    console::measure_text_width(s)
}

fn border_line(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

fn format_row(cells: &[String], widths: &[usize], bold: bool) -> String {
    let mut line = String::from("|");
    for (i, width) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let padding = " ".repeat(width - display_width(cell));
        if bold {
            line.push_str(&format!(" {}{} |", cell.bold(), padding));
        } else {
            line.push_str(&format!(" {}{} |", cell, padding));
        }
    }
    line
}

/// How the CLI prints reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Check if color output is disabled via NO_COLOR env var.
pub fn colors_enabled() -> bool {
    std::env::var("NO_COLOR").is_err() && io::stdout().is_terminal()
}

/// Print a report to stdout.
pub fn print(report: &Report, format: OutputFormat) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match format {
        OutputFormat::Table => {
            let color = colors_enabled();
            if color {
                writeln!(out, "{}\n", report.title.bold())?;
            } else {
                writeln!(out, "{}\n", report.title)?;
            }
            writeln!(out, "{}", report.render_table(color))?;
        }
        OutputFormat::Json => {
            writeln!(out, "{}", report.to_json()?)?;
        }
    }

    Ok(())
}

/// Progress sink that rewrites a `label: done/total` line on stderr.
///
/// Returns `None` when stderr is not a terminal.
pub fn progress_line(label: &str) -> Option<ProgressFn> {
    if !io::stderr().is_terminal() {
        return None;
    }

    let label = label.to_string();
    Some(Arc::new(move |done: usize, total: usize| {
        let mut err = io::stderr().lock();
        let _ = write!(err, "\r{}: {}/{}", label, done, total);
        if done >= total {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }))
}
