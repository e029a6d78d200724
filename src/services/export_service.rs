use anyhow::Result;
use csv::Writer;
use serde::Serialize;
use std::str::FromStr;

use crate::domain::{DateRange, Row};
use crate::services::error_handling::TimingsError;
use crate::services::stats_view::ViewSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = TimingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            other => Err(TimingsError::UnknownCommand {
                command: format!("export {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedRow {
    pub day: String,
    pub client: String,
    pub project: String,
    pub summary: String,
    pub total: f64,
    /// `None` when the transform failed for this row.
    pub transformed: Option<f64>,
}

impl From<&Row> for ExportedRow {
    fn from(row: &Row) -> Self {
        ExportedRow {
            day: row.day.format("%Y-%m-%d").to_string(),
            client: row.client.clone(),
            project: row.project.clone(),
            summary: row.summary.clone(),
            total: row.total,
            transformed: row.transformed.value(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedTable {
    pub from: String,
    pub to: String,
    pub rows: Vec<ExportedRow>,
    pub total_raw: f64,
    pub total_transformed: f64,
}

/// Rows chosen for export, with totals over exactly those rows.
pub struct ExportService {
    range: DateRange,
    rows: Vec<Row>,
}

impl ExportService {
    pub fn new(range: DateRange, rows: Vec<Row>) -> Self {
        Self { range, rows }
    }

    /// Exports the selected rows, or every visible row when none is selected.
    pub fn from_snapshot(snapshot: &ViewSnapshot) -> Self {
        let selected = snapshot.selected_rows();
        let rows = if selected.is_empty() {
            snapshot.rows.clone()
        } else {
            selected
        };
        Self::new(snapshot.range, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_raw(&self) -> f64 {
        self.rows.iter().map(|r| r.total).sum()
    }

    pub fn total_transformed(&self) -> f64 {
        self.rows.iter().map(|r| r.transformed.or_zero()).sum()
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => self.export_to_csv(),
            ExportFormat::Json => self.export_to_json(),
            ExportFormat::Markdown => Ok(self.export_to_markdown()),
        }
    }

    pub fn export_to_json(&self) -> Result<String> {
        let table = ExportedTable {
            from: self.range.from.to_string(),
            to: self.range.to.to_string(),
            rows: self.rows.iter().map(Into::into).collect(),
            total_raw: self.total_raw(),
            total_transformed: self.total_transformed(),
        };
        Ok(serde_json::to_string_pretty(&table)?)
    }

    /// One line per row plus a trailing totals line.
    pub fn export_to_csv(&self) -> Result<String> {
        let mut wtr = Writer::from_writer(vec![]);

        wtr.write_record(["Day", "Client", "Project", "Summary", "Total", "Transformed"])?;

        for row in &self.rows {
            wtr.write_record([
                row.day.format("%Y-%m-%d").to_string(),
                row.client.clone(),
                row.project.clone(),
                row.summary.clone(),
                format!("{:.2}", row.total),
                row.transformed.to_string(),
            ])?;
        }

        wtr.write_record([
            "Total".to_string(),
            String::new(),
            String::new(),
            String::new(),
            format!("{:.2}", self.total_raw()),
            format!("{:.2}", self.total_transformed()),
        ])?;

        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }

    pub fn export_to_markdown(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("# Timings {}\n\n", self.range));
        output.push_str("| Day | Client | Project | Summary | Total | Transformed |\n");
        output.push_str("|---|---|---|---|---:|---:|\n");
        for row in &self.rows {
            output.push_str(&format!(
                "| {} | {} | {} | {} | {:.2} | {} |\n",
                row.day,
                escape_cell(&row.client),
                escape_cell(&row.project),
                escape_cell(&row.summary),
                row.total,
                row.transformed
            ));
        }
        output.push_str(&format!(
            "| **Total** | | | | {:.2} | {:.2} |\n",
            self.total_raw(),
            self.total_transformed()
        ));
        output
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
