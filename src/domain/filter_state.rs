use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::date_range::{DEFAULT_DATE_RANGE, DateRange};
use crate::services::error_handling::TimingsError;

/// Everything the user can type into the table header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub date_range: String,
    pub client: String,
    pub project: String,
    pub transform: String,
    pub filter: String,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            date_range: FilterField::DateRange.default_value().to_string(),
            client: FilterField::Client.default_value().to_string(),
            project: FilterField::Project.default_value().to_string(),
            transform: FilterField::Transform.default_value().to_string(),
            filter: FilterField::Filter.default_value().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    DateRange,
    Client,
    Project,
    Transform,
    Filter,
}

impl FilterField {
    pub const ALL: [FilterField; 5] = [
        FilterField::DateRange,
        FilterField::Client,
        FilterField::Project,
        FilterField::Transform,
        FilterField::Filter,
    ];

    /// Name used in shareable links.
    pub fn key(&self) -> &'static str {
        match self {
            FilterField::DateRange => "range",
            FilterField::Client => "client",
            FilterField::Project => "project",
            FilterField::Transform => "transform",
            FilterField::Filter => "filter",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            FilterField::DateRange => DEFAULT_DATE_RANGE,
            FilterField::Transform => "x",
            FilterField::Client | FilterField::Project | FilterField::Filter => "",
        }
    }

    /// Whether a change to this field alters the rows requested from the store.
    pub fn affects_query(&self) -> bool {
        matches!(
            self,
            FilterField::DateRange | FilterField::Client | FilterField::Project
        )
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FilterField {
    type Err = TimingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "range" | "date" | "dates" => Ok(FilterField::DateRange),
            "client" => Ok(FilterField::Client),
            "project" => Ok(FilterField::Project),
            "transform" => Ok(FilterField::Transform),
            "filter" => Ok(FilterField::Filter),
            other => Err(TimingsError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }
}

impl FilterState {
    pub fn get(&self, field: FilterField) -> &str {
        match field {
            FilterField::DateRange => &self.date_range,
            FilterField::Client => &self.client,
            FilterField::Project => &self.project,
            FilterField::Transform => &self.transform,
            FilterField::Filter => &self.filter,
        }
    }

    /// Returns true when the stored value actually changed.
    pub fn set(&mut self, field: FilterField, value: impl Into<String>) -> bool {
        let value = value.into();
        let slot = match field {
            FilterField::DateRange => &mut self.date_range,
            FilterField::Client => &mut self.client,
            FilterField::Project => &mut self.project,
            FilterField::Transform => &mut self.transform,
            FilterField::Filter => &mut self.filter,
        };
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    pub fn date_range(&self, today: NaiveDate) -> DateRange {
        DateRange::parse_or_default(&self.date_range, today)
    }

    /// Parameters sent to the row data source for this state.
    pub fn query_params(&self, today: NaiveDate) -> QueryParams {
        let range = self.date_range(today);
        QueryParams {
            from: range.from,
            to: range.to,
            client: non_empty(&self.client),
            project: non_empty(&self.project),
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Store query arguments; their JSON form is the query cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub client: Option<String>,
    pub project: Option<String>,
}

impl QueryParams {
    pub fn for_range(range: DateRange) -> Self {
        Self {
            from: range.from,
            to: range.to,
            client: None,
            project: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}
