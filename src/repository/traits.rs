//! Collaborators the stats view depends on.
//!
//! The SQLite repositories implement these; tests substitute mocks.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{QueryParams, RawRow, SummaryUpdate, WriteOutcome};

/// Daily totals with their summaries merged in.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RowDataSource: Send + Sync {
    async fn fetch_totals(&self, params: &QueryParams) -> Result<Vec<RawRow>>;
}

/// Stores or clears the summary of one day/client/project.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummaryWriter: Send + Sync {
    async fn write_summary(&self, update: &SummaryUpdate) -> Result<WriteOutcome>;
}
