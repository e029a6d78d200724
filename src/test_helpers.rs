// Test helpers for integration testing

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;

use crate::domain::FilterState;
use crate::repository::Repository;
use crate::services::{StatsView, ViewOptions};

pub struct TestContext {
    pub repository: Arc<Repository>,
}

impl TestContext {
    pub async fn new_for_test() -> Result<Self> {
        let repository = Arc::new(Repository::new_memory().await?);
        Ok(Self { repository })
    }

    /// Records `hours` worked on `day`, starting at 09:00 UTC.
    pub async fn log_hours(&self, day: NaiveDate, client: &str, project: &str, hours: f64) -> Result<()> {
        let project_id = self.repository.catalog.ensure_project(client, project).await?;
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
        let start = day.and_time(nine).and_utc();
        let end = start + chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64);
        self.repository.catalog.record_timing(project_id, start, end).await?;
        Ok(())
    }

    pub fn view(&self, filters: FilterState, options: ViewOptions) -> StatsView {
        StatsView::new(
            self.repository.row_source(),
            self.repository.summary_writer(),
            filters,
            options,
        )
    }
}
