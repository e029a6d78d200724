use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::row::RowKey;

/// Request to set (or clear) the free-text summary of one day/client/project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryUpdate {
    pub day: NaiveDate,
    pub client: String,
    pub project: String,
    pub text: String,
}

impl SummaryUpdate {
    pub fn new(key: &RowKey, text: impl Into<String>) -> Self {
        Self {
            day: key.day,
            client: key.client.clone(),
            project: key.project.clone(),
            text: text.into(),
        }
    }

    /// Blank text removes the stored summary instead of writing it.
    pub fn is_clear(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.day, self.client.clone(), self.project.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub success: bool,
}
