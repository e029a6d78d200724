use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a table row: one client/project pair on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub day: NaiveDate,
    pub project: String,
    pub client: String,
}

impl RowKey {
    pub fn new(day: NaiveDate, client: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            day,
            project: project.into(),
            client: client.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.day, self.project, self.client)
    }
}

/// A daily total as delivered by the row data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub day: NaiveDate,
    pub project: String,
    pub client: String,
    pub summary: String,
    /// Hours worked on that day.
    pub total: f64,
}

impl RawRow {
    pub fn new(
        day: NaiveDate,
        client: impl Into<String>,
        project: impl Into<String>,
        total: f64,
    ) -> Self {
        Self {
            day,
            project: project.into(),
            client: client.into(),
            summary: String::new(),
            total,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.day, self.client.clone(), self.project.clone())
    }
}

/// Result of applying the transform expression to a row's total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transformed {
    Value(f64),
    Error,
}

impl Transformed {
    pub fn value(&self) -> Option<f64> {
        match self {
            Transformed::Value(v) => Some(*v),
            Transformed::Error => None,
        }
    }

    /// Contribution to column totals; errors count as zero.
    pub fn or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Transformed::Error)
    }
}

impl fmt::Display for Transformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformed::Value(v) => write!(f, "{:.2}", v),
            Transformed::Error => f.write_str("Error"),
        }
    }
}

/// A row as displayed: the raw row plus its transformed total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub day: NaiveDate,
    pub project: String,
    pub client: String,
    pub summary: String,
    pub total: f64,
    pub transformed: Transformed,
}

impl Row {
    pub fn from_raw(raw: &RawRow, transformed: Transformed) -> Self {
        Self {
            day: raw.day,
            project: raw.project.clone(),
            client: raw.client.clone(),
            summary: raw.summary.clone(),
            total: raw.total,
            transformed,
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.day, self.client.clone(), self.project.clone())
    }
}
