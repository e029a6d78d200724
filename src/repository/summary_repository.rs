use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use super::catalog_repository::CatalogRepository;
use super::traits::SummaryWriter;
use crate::domain::{SummaryUpdate, WriteOutcome};
use crate::services::error_handling::{LogHelper, TimingsError};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct SummaryRepository {
    pool: Arc<SqlitePool>,
    catalog: CatalogRepository,
}

/// Epoch-millisecond bounds of a UTC calendar day.
fn day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    (start, start + DAY_MS)
}

impl SummaryRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        let catalog = CatalogRepository::new(pool.clone());
        Self { pool, catalog }
    }

    /// Deletes the summary when the text is blank, otherwise upserts the
    /// trimmed text.
    pub async fn write(&self, update: &SummaryUpdate) -> Result<WriteOutcome> {
        let project_id = self
            .catalog
            .find_project(&update.client, &update.project)
            .await?
            .ok_or_else(|| TimingsError::ProjectNotFound {
                client: update.client.clone(),
                project: update.project.clone(),
            })?;

        let (start, end) = day_bounds(update.day);

        if update.is_clear() {
            sqlx::query("DELETE FROM summary WHERE start = ? AND project_id = ?")
                .bind(start)
                .bind(project_id)
                .execute(self.pool.as_ref())
                .await?;
            LogHelper::log_summary_write(update.day, &update.client, &update.project, true);
            return Ok(WriteOutcome { success: true });
        }

        sqlx::query(
            r#"
            INSERT INTO summary (start, "end", text, project_id, archived)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(project_id, start, "end") DO UPDATE SET
                text = excluded.text,
                archived = excluded.archived
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(update.text.trim())
        .bind(project_id)
        .execute(self.pool.as_ref())
        .await?;

        info!(
            day = %update.day,
            client = %update.client,
            project = %update.project,
            "Summary saved"
        );
        LogHelper::log_summary_write(update.day, &update.client, &update.project, false);
        Ok(WriteOutcome { success: true })
    }

    pub async fn get(&self, day: NaiveDate, client: &str, project: &str) -> Result<Option<String>> {
        let text: Option<String> = sqlx::query_scalar(
            "SELECT summary FROM daily_summaries WHERE day = ? AND client = ? AND project = ?",
        )
        .bind(day.format("%Y-%m-%d").to_string())
        .bind(client)
        .bind(project)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(text)
    }
}

#[async_trait]
impl SummaryWriter for SummaryRepository {
    async fn write_summary(&self, update: &SummaryUpdate) -> Result<WriteOutcome> {
        self.write(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RowKey;
    use crate::repository::database::init_test_database;

    async fn setup() -> SummaryRepository {
        let pool = Arc::new(init_test_database().await.unwrap());
        let repo = SummaryRepository::new(pool);
        repo.catalog.ensure_project("Acme", "Website").await.unwrap();
        repo
    }

    fn update(text: &str) -> SummaryUpdate {
        let key = RowKey::new(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), "Acme", "Website");
        SummaryUpdate::new(&key, text)
    }

    #[test]
    fn test_day_bounds_are_utc_midnights() {
        let (start, end) = day_bounds(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap());
        assert_eq!(start, DAY_MS);
        assert_eq!(end, 2 * DAY_MS);
    }

    #[tokio::test]
    async fn test_upsert_trims_and_overwrites() {
        let repo = setup().await;
        let day = update("").day;

        repo.write(&update("  first draft ")).await.unwrap();
        assert_eq!(
            repo.get(day, "Acme", "Website").await.unwrap().as_deref(),
            Some("first draft")
        );

        let outcome = repo.write(&update("final")).await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            repo.get(day, "Acme", "Website").await.unwrap().as_deref(),
            Some("final")
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM summary")
            .fetch_one(repo.pool.as_ref())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_blank_text_deletes() {
        let repo = setup().await;
        let day = update("").day;
        repo.write(&update("something")).await.unwrap();

        let outcome = repo.write(&update("   ")).await.unwrap();
        assert!(outcome.success);
        assert_eq!(repo.get(day, "Acme", "Website").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let repo = setup().await;
        let mut request = update("text");
        request.project = "Nope".to_string();

        let error = repo.write(&request).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<TimingsError>(),
            Some(TimingsError::ProjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_archived_summary_is_hidden_and_rewrite_restores_it() {
        let repo = setup().await;
        let day = update("").day;
        repo.write(&update("note")).await.unwrap();

        sqlx::query("UPDATE summary SET archived = 1")
            .execute(repo.pool.as_ref())
            .await
            .unwrap();
        assert_eq!(repo.get(day, "Acme", "Website").await.unwrap(), None);

        repo.write(&update("note again")).await.unwrap();
        assert_eq!(
            repo.get(day, "Acme", "Website").await.unwrap().as_deref(),
            Some("note again")
        );
    }
}
