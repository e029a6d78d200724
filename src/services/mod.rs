pub mod aggregation;
pub mod error_handling;
pub mod export_service;
pub mod expression;
pub mod filter_persistence;
pub mod liveness;
pub mod query_cache;
pub mod selection;
pub mod stats_view;
pub mod summary_sync;

pub use export_service::{ExportFormat, ExportService};
pub use stats_view::{StatsView, ViewOptions, ViewSnapshot};
