pub mod catalog_repository;
pub mod database;
pub mod summary_repository;
pub mod totals_repository;
pub mod traits;

pub use traits::{RowDataSource, SummaryWriter};

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::liveness::LivenessPinger;

#[derive(Clone)]
pub struct Repository {
    pub pool: Arc<SqlitePool>,
    pub catalog: catalog_repository::CatalogRepository,
    pub totals: totals_repository::TotalsRepository,
    pub summaries: summary_repository::SummaryRepository,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);
        Self {
            catalog: catalog_repository::CatalogRepository::new(pool.clone()),
            totals: totals_repository::TotalsRepository::new(pool.clone()),
            summaries: summary_repository::SummaryRepository::new(pool.clone()),
            pool,
        }
    }

    /// Repository over a fresh, migrated in-memory database.
    pub async fn new_memory() -> anyhow::Result<Self> {
        let pool = database::init_test_database().await?;
        Ok(Self::new(pool))
    }

    pub fn row_source(&self) -> Arc<dyn RowDataSource> {
        Arc::new(self.totals.clone())
    }

    pub fn summary_writer(&self) -> Arc<dyn SummaryWriter> {
        Arc::new(self.summaries.clone())
    }

    pub fn pinger(&self) -> Arc<dyn LivenessPinger> {
        Arc::new(database::DatabasePinger::new(self.pool.clone()))
    }
}
