#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Renders a [`BatchReport`] as Markdown, CSV and JSON.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tabled::{Table, Tabled, settings::Style};
use uuid::Uuid;

use crate::aggregate::BatchReport;

#[derive(Tabled)]
/// One row of the compiler summary table.
struct SummaryRow {
    #[tabled(rename = "name")]
    /// student identity
    name:   String,
    #[tabled(rename = "status")]
    /// whether the build exited with 0
    status: bool,
}

/// Renders the Markdown report.
pub fn render_markdown(report: &BatchReport, time: DateTime<Local>) -> String {
    let mut md = String::from("# Grader report\n\n");
    let _ = writeln!(md, "Time: {}", time.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(md, "Total Submissions: {}", report.builds.len());

    md.push_str("\n## Unprocessed submissions\n\n");
    for failure in &report.failures {
        let _ = write!(
            md,
            "**{}**\n\n```\n{}\n```\n\n",
            failure.source.display(),
            failure.description
        );
    }

    md.push_str("\n## Compiler summary\n\n");
    if !report.builds.is_empty() {
        let rows = report.builds.iter().map(|(name, result)| SummaryRow {
            name:   name.clone(),
            status: result.succeeded(),
        });
        md.push_str(&Table::new(rows).with(Style::markdown()).to_string());
        md.push('\n');
    }

    md.push_str("\n## Compiler output\n\n");
    for (name, result) in &report.builds {
        let _ = write!(
            md,
            "**{name}**: {}\n\n```\n{}\n```\n\n",
            result.succeeded(),
            result.output.trim_end()
        );
    }

    md
}

/// Renders the `name,status` CSV, one row per identity.
pub fn render_csv(report: &BatchReport) -> String {
    let mut csv = String::from("name,status\n");
    for (name, result) in &report.builds {
        let _ = writeln!(csv, "{},{}", csv_field(name), u8::from(result.succeeded()));
    }
    csv
}

/// Quotes a CSV field when it needs it.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Serializes the whole report as pretty JSON.
pub fn render_json(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where [`write_reports`] put its files.
pub struct ReportPaths {
    /// the Markdown report
    pub markdown: PathBuf,
    /// the CSV summary
    pub csv:      PathBuf,
    /// the JSON dump
    pub json:     PathBuf,
}

/// Writes `<name>-<8 hex>.{md,csv,json}` into `dir`.
pub fn write_reports(report: &BatchReport, dir: &Path, name: &str) -> Result<ReportPaths> {
    fs::create_dir_all(dir).with_context(|| format!("Could not create {}", dir.display()))?;

    let id = Uuid::new_v4().simple().to_string();
    let stem = format!("{name}-{}", &id[..8]);
    let paths = ReportPaths {
        markdown: dir.join(format!("{stem}.md")),
        csv:      dir.join(format!("{stem}.csv")),
        json:     dir.join(format!("{stem}.json")),
    };

    tracing::info!("Generating report at {}", paths.markdown.display());
    fs::write(&paths.markdown, render_markdown(report, Local::now()))
        .with_context(|| format!("Could not write {}", paths.markdown.display()))?;
    fs::write(&paths.csv, render_csv(report))
        .with_context(|| format!("Could not write {}", paths.csv.display()))?;
    fs::write(&paths.json, render_json(report)?)
        .with_context(|| format!("Could not write {}", paths.json.display()))?;

    Ok(paths)
}
