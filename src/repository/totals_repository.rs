use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use super::traits::RowDataSource;
use crate::domain::{QueryParams, RawRow};
use crate::services::error_handling::{PerformanceMonitor, TimingsError};

const SLOW_QUERY_MS: u64 = 200;

/// `LIKE` pattern matching `needle` anywhere, with its own wildcards escaped.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// SQLite folds case for ASCII only, so a non-ASCII needle is matched
/// client-side alone.
fn pushdown(needle: &Option<String>) -> Option<&str> {
    needle.as_deref().filter(|n| n.is_ascii())
}

/// Reads the `daily_totals` view with matching `daily_summaries` merged in.
#[derive(Clone)]
pub struct TotalsRepository {
    pool: Arc<SqlitePool>,
}

impl TotalsRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn fetch(&self, params: &QueryParams) -> Result<Vec<RawRow>> {
        let _monitor = PerformanceMonitor::new("fetch_totals", SLOW_QUERY_MS);

        let mut query = String::from(
            r#"
            SELECT t.day AS day, t.project AS project, t.client AS client,
                   COALESCE(s.summary, '') AS summary, t.hours AS hours
            FROM daily_totals t
            LEFT JOIN daily_summaries s ON s.day = t.day AND s.project_id = t.project_id
            WHERE t.day >= ? AND t.day <= ?
            "#,
        );

        let mut patterns = Vec::new();
        if let Some(client) = pushdown(&params.client) {
            query.push_str(r" AND t.client LIKE ? ESCAPE '\'");
            patterns.push(contains_pattern(client));
        }
        if let Some(project) = pushdown(&params.project) {
            query.push_str(r" AND t.project LIKE ? ESCAPE '\'");
            patterns.push(contains_pattern(project));
        }
        query.push_str(" ORDER BY t.day, t.client, t.project");

        let mut statement = sqlx::query(&query)
            .bind(params.from.format("%Y-%m-%d").to_string())
            .bind(params.to.format("%Y-%m-%d").to_string());
        for pattern in patterns {
            statement = statement.bind(pattern);
        }

        let rows = statement
            .fetch_all(self.pool.as_ref())
            .await
            .context("Failed to query daily totals")?;

        let mut totals = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.get("day");
            let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|_| {
                TimingsError::InvalidStoredDay {
                    table: "daily_totals",
                    value: day.clone(),
                }
            })?;
            totals.push(RawRow {
                day,
                project: row.get("project"),
                client: row.get("client"),
                summary: row.get("summary"),
                total: row.get("hours"),
            });
        }

        debug!(
            from = %params.from,
            to = %params.to,
            rows = totals.len(),
            "Fetched daily totals"
        );
        Ok(totals)
    }
}

#[async_trait]
impl RowDataSource for TotalsRepository {
    async fn fetch_totals(&self, params: &QueryParams) -> Result<Vec<RawRow>> {
        self.fetch(params).await
    }
}
