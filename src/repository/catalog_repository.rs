use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Clients, projects and the raw timing entries behind the daily totals.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: Arc<SqlitePool>,
}

impl CatalogRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Returns the id of the named client, creating it when missing.
    pub async fn ensure_client(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO client (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(self.pool.as_ref())
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM client WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    /// Returns the id of the client's project, creating both when missing.
    pub async fn ensure_project(&self, client: &str, project: &str) -> Result<i64> {
        let client_id = self.ensure_client(client).await?;

        sqlx::query(
            "INSERT INTO project (name, client_id) VALUES (?, ?) ON CONFLICT(client_id, name) DO NOTHING",
        )
        .bind(project)
        .bind(client_id)
        .execute(self.pool.as_ref())
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM project WHERE client_id = ? AND name = ?")
            .bind(client_id)
            .bind(project)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    pub async fn find_project(&self, client: &str, project: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT project.id FROM project
            INNER JOIN client ON client.id = project.client_id
            WHERE client.name = ? AND project.name = ?
            "#,
        )
        .bind(client)
        .bind(project)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(id)
    }

    pub async fn record_timing(
        &self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(r#"INSERT INTO timing (start, "end", project_id) VALUES (?, ?, ?)"#)
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
            .bind(project_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::database::init_test_database;
    use chrono::TimeZone;

    async fn setup() -> CatalogRepository {
        let pool = init_test_database().await.unwrap();
        CatalogRepository::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn test_ensure_project_is_idempotent() {
        let repo = setup().await;
        let first = repo.ensure_project("Acme", "Website").await.unwrap();
        let second = repo.ensure_project("Acme", "Website").await.unwrap();
        assert_eq!(first, second);

        let other = repo.ensure_project("Globex", "Website").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_find_project_by_names() {
        let repo = setup().await;
        let id = repo.ensure_project("Acme", "Website").await.unwrap();
        assert_eq!(repo.find_project("Acme", "Website").await.unwrap(), Some(id));
        assert_eq!(repo.find_project("Acme", "Mobile").await.unwrap(), None);
        assert_eq!(repo.find_project("Globex", "Website").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_timing_rejects_unknown_project() {
        let repo = setup().await;
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        assert!(repo.record_timing(999, start, end).await.is_err());
    }
}
