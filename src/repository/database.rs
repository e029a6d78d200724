use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use crate::services::liveness::LivenessPinger;

pub async fn init_database(db_path: &str) -> Result<SqlitePool> {
    // Ensure the directory exists
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let db_url = format!("sqlite://{}", db_path);

    if !Sqlite::database_exists(&db_url).await? {
        info!(path = %db_path, "Creating new database");
        Sqlite::create_database(&db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .with_context(|| format!("Failed to open database {}", db_path))?;

    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    Ok(pool)
}

pub async fn init_test_database() -> Result<SqlitePool> {
    // Use in-memory database for tests
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Keep-alive round-trip against the store.
pub struct DatabasePinger {
    pool: Arc<SqlitePool>,
}

impl DatabasePinger {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LivenessPinger for DatabasePinger {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .context("Keep-alive query failed")?;
        Ok(())
    }
}
