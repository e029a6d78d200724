//! The stats table: filter state, the debounced totals query, client-side
//! aggregation, row selection and summary edits, recomputed on demand.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::config::AppConfig;
use crate::domain::{DateRange, FilterField, FilterState, QueryParams, RawRow, Row, RowKey, SummaryUpdate};
use crate::repository::{RowDataSource, SummaryWriter};
use crate::services::aggregation::Pipeline;
use crate::services::error_handling::TimingsError;
use crate::services::filter_persistence::{PersistedFilters, QueryString};
use crate::services::query_cache::{
    DebouncedQuery, Fetcher, QueryOptions, QuerySnapshot, QueryStatus,
};
use crate::services::selection::{CheckState, Selection};
use crate::services::summary_sync::{DEFAULT_SUMMARY_DEBOUNCE, SummarySync};

/// Adapts a [`RowDataSource`] to the query cache.
pub struct TotalsFetcher {
    source: Arc<dyn RowDataSource>,
}

impl TotalsFetcher {
    pub fn new(source: Arc<dyn RowDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Fetcher<QueryParams, Vec<RawRow>> for TotalsFetcher {
    async fn fetch(&self, params: &QueryParams) -> Result<Vec<RawRow>> {
        self.source.fetch_totals(params).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub query: QueryOptions,
    pub summary_delay: Duration,
    pub today: NaiveDate,
}

impl ViewOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            query: QueryOptions::default(),
            summary_delay: DEFAULT_SUMMARY_DEBOUNCE,
            today,
        }
    }

    pub fn from_config(config: &AppConfig, today: NaiveDate) -> Self {
        Self {
            query: QueryOptions {
                delay: Duration::from_millis(config.debounce_ms),
                capacity: config.cache_capacity,
            },
            summary_delay: Duration::from_millis(config.summary_debounce_ms),
            today,
        }
    }
}

/// Everything needed to render the table once.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub range: DateRange,
    pub rows: Vec<Row>,
    pub total_raw: f64,
    pub total_transformed: f64,
    pub status: QueryStatus,
    pub last_error: Option<Arc<anyhow::Error>>,
    pub check_state: CheckState,
    pub selected: Vec<bool>,
    /// Rows whose summary edit failed to save, aligned with `rows`.
    pub unsaved: Vec<bool>,
}

impl ViewSnapshot {
    pub fn keys(&self) -> Vec<RowKey> {
        self.rows.iter().map(Row::key).collect()
    }

    pub fn selected_count(&self) -> usize {
        self.selected.iter().filter(|s| **s).count()
    }

    pub fn unsaved_count(&self) -> usize {
        self.unsaved.iter().filter(|s| **s).count()
    }

    pub fn selected_rows(&self) -> Vec<Row> {
        self.rows
            .iter()
            .zip(&self.selected)
            .filter(|(_, selected)| **selected)
            .map(|(row, _)| row.clone())
            .collect()
    }
}

struct ViewState {
    filters: FilterState,
    pipeline: Pipeline,
    selection: Selection,
    /// Locally typed summaries shown until the store reflects them.
    edits: HashMap<RowKey, String>,
    today: NaiveDate,
}

pub struct StatsView {
    query: DebouncedQuery<QueryParams, Vec<RawRow>>,
    summaries: SummarySync,
    state: Mutex<ViewState>,
}

impl StatsView {
    pub fn new(
        source: Arc<dyn RowDataSource>,
        writer: Arc<dyn SummaryWriter>,
        filters: FilterState,
        options: ViewOptions,
    ) -> Self {
        let query = DebouncedQuery::new(
            Vec::new(),
            Arc::new(TotalsFetcher::new(source)),
            filters.query_params(options.today),
            options.query,
        );

        let summaries = SummarySync::new(writer, options.summary_delay);
        let refresh = query.clone();
        summaries.on_written(move |update| {
            debug!(row = %update.key(), "Refreshing totals after summary write");
            refresh.refresh();
        });

        Self {
            query,
            summaries,
            state: Mutex::new(ViewState {
                pipeline: Pipeline::new(&filters),
                filters,
                selection: Selection::new(),
                edits: HashMap::new(),
                today: options.today,
            }),
        }
    }

    /// Restores filters from a shared link's query string.
    pub fn from_link(
        source: Arc<dyn RowDataSource>,
        writer: Arc<dyn SummaryWriter>,
        link: &str,
        options: ViewOptions,
    ) -> Self {
        let filters = PersistedFilters::load(&QueryString::parse(link));
        Self::new(source, writer, filters, options)
    }

    pub fn activate(&self) {
        self.query.activate();
    }

    pub fn filters(&self) -> FilterState {
        self.state.lock().filters.clone()
    }

    pub fn today(&self) -> NaiveDate {
        self.state.lock().today
    }

    /// Returns true when the value changed. Only range, client and project
    /// changes reach the store; the rest is recomputed locally.
    pub fn set_filter(&self, field: FilterField, value: impl Into<String>) -> bool {
        let params = {
            let mut state = self.state.lock();
            if !state.filters.set(field, value) {
                return false;
            }
            state.pipeline = Pipeline::new(&state.filters);
            field
                .affects_query()
                .then(|| state.filters.query_params(state.today))
        };
        debug!(field = %field, "Filter changed");
        if let Some(params) = params {
            self.query.set_params(params);
        }
        true
    }

    /// Moves the anchor of relative date ranges, e.g. after midnight.
    pub fn set_today(&self, today: NaiveDate) {
        let params = {
            let mut state = self.state.lock();
            state.today = today;
            state.filters.query_params(today)
        };
        self.query.set_params(params);
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let query = self.query.snapshot();
        let mut state = self.state.lock();

        let mut raw = query.value;
        if !state.edits.is_empty() {
            for row in raw.iter_mut() {
                let key = row.key();
                let Some(text) = state.edits.get(&key).cloned() else {
                    continue;
                };
                if row.summary == text.trim() && self.summaries.pending_text(&key).is_none() {
                    state.edits.remove(&key);
                } else {
                    row.summary = text;
                }
            }
        }

        let aggregated = state.pipeline.apply(&raw);
        let keys: Vec<RowKey> = aggregated.rows.iter().map(Row::key).collect();
        ViewSnapshot {
            range: state.filters.date_range(state.today),
            check_state: state.selection.check_state(&keys),
            selected: keys.iter().map(|k| state.selection.is_selected(k)).collect(),
            unsaved: keys.iter().map(|k| self.summaries.failure(k).is_some()).collect(),
            rows: aggregated.rows,
            total_raw: aggregated.total_raw,
            total_transformed: aggregated.total_transformed,
            status: query.status,
            last_error: query.last_error,
        }
    }

    fn row_at(&self, position: usize) -> Result<Row, TimingsError> {
        self.snapshot()
            .rows
            .into_iter()
            .nth(position)
            .ok_or(TimingsError::UnknownRow { position })
    }

    /// Toggles the visible row at `position`; returns whether it is now
    /// selected.
    pub fn toggle_row(&self, position: usize) -> Result<bool, TimingsError> {
        let key = self.row_at(position)?.key();
        let mut state = self.state.lock();
        state.selection.toggle_one(&key);
        Ok(state.selection.is_selected(&key))
    }

    pub fn toggle_all(&self) -> CheckState {
        let keys = self.snapshot().keys();
        let mut state = self.state.lock();
        state.selection.toggle_all(&keys);
        state.selection.check_state(&keys)
    }

    pub fn clear_selection(&self) {
        self.state.lock().selection.clear();
    }

    pub fn selected_rows(&self) -> Vec<Row> {
        self.snapshot().selected_rows()
    }

    /// Shows `text` immediately and writes it back after the quiet period.
    pub fn edit_summary(&self, position: usize, text: impl Into<String>) -> Result<(), TimingsError> {
        let key = self.row_at(position)?.key();
        let text = text.into();
        self.state.lock().edits.insert(key.clone(), text.clone());
        self.summaries.schedule(SummaryUpdate::new(&key, text));
        Ok(())
    }

    pub async fn flush(&self) -> Result<usize> {
        self.summaries.flush().await
    }

    pub fn summary_error(&self) -> Option<Arc<anyhow::Error>> {
        self.summaries.take_last_error()
    }

    /// Query string reproducing the current filters.
    pub fn link(&self) -> String {
        let mut store = QueryString::new();
        PersistedFilters::save(&mut store, &self.state.lock().filters);
        store.to_string()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot<Vec<RawRow>>> {
        self.query.subscribe()
    }

    /// Waits until no debounce timer or latest fetch is outstanding.
    pub async fn settle(&self) {
        let mut rx = self.query.subscribe();
        let _ = rx
            .wait_for(|s| !s.status.is_pending && !s.status.is_loading)
            .await;
    }

    pub fn status(&self) -> QueryStatus {
        self.query.status()
    }

    pub fn fetch_count(&self) -> u64 {
        self.query.fetch_count()
    }

    /// Compile errors of the current transform and filter expressions.
    pub fn expression_errors(&self) -> Vec<TimingsError> {
        let state = self.state.lock();
        let pipeline = &state.pipeline;
        let mut errors = Vec::new();
        if let Some(error) = pipeline.transform().error() {
            errors.push(TimingsError::Expression {
                kind: "transform",
                source_text: pipeline.transform().source().to_string(),
                error: error.clone(),
            });
        }
        if let Some(error) = pipeline.filter().error() {
            errors.push(TimingsError::Expression {
                kind: "filter",
                source_text: pipeline.filter().source().to_string(),
                error: error.clone(),
            });
        }
        errors
    }
}
