use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::services::expression::ExprError;

/// Domain errors with descriptive messages
#[derive(Error, Debug)]
pub enum TimingsError {
    #[error("Project not found: {client} - {project}")]
    ProjectNotFound { client: String, project: String },

    #[error("Invalid date range expression '{input}': {reason}")]
    InvalidDateRange { input: String, reason: String },

    #[error("Invalid {kind} expression '{source_text}': {error}")]
    Expression {
        kind: &'static str,
        source_text: String,
        error: ExprError,
    },

    #[error("No visible row at position {position}")]
    UnknownRow { position: usize },

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Invalid stored day '{value}' in {table}")]
    InvalidStoredDay { table: &'static str, value: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Error context wrapper for better debugging
pub struct ErrorContext {
    operation: String,
    details: Vec<(String, String)>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    pub fn wrap<T>(self, result: Result<T>) -> Result<T> {
        result.with_context(|| {
            let mut msg = format!("Operation '{}' failed", self.operation);
            if !self.details.is_empty() {
                msg.push_str(" with context:");
                for (key, value) in self.details {
                    msg.push_str(&format!("\n  {}: {}", key, value));
                }
            }
            msg
        })
    }
}

/// Structured logging helpers
pub struct LogHelper;

impl LogHelper {
    pub fn log_summary_write(day: NaiveDate, client: &str, project: &str, cleared: bool) {
        debug!(
            day = %day,
            client = %client,
            project = %project,
            cleared = cleared,
            "Summary written"
        );
    }

    pub fn log_error_with_context(context: &str, error: &anyhow::Error) {
        error!(
            context = %context,
            error = %error,
            error_chain = ?error.chain().map(|e| e.to_string()).collect::<Vec<_>>(),
            "Error occurred"
        );
    }

    pub fn log_performance_warning(operation: &str, duration_ms: u64, threshold_ms: u64) {
        if duration_ms > threshold_ms {
            warn!(
                operation = %operation,
                duration_ms = duration_ms,
                threshold_ms = threshold_ms,
                "Operation exceeded performance threshold"
            );
        }
    }
}

/// User-friendly error messages
pub struct UserErrorFormatter;

impl UserErrorFormatter {
    pub fn format_for_ui(error: &anyhow::Error) -> String {
        if let Some(timings_error) = error.downcast_ref::<TimingsError>() {
            return Self::format_timings_error(timings_error);
        }

        if error.downcast_ref::<sqlx::Error>().is_some() {
            return "A database error occurred. Please try again.".to_string();
        }

        let error_str = error.to_string().to_lowercase();

        if error_str.contains("database") || error_str.contains("sqlite") {
            return "A database error occurred. Please try again.".to_string();
        }

        if error_str.contains("timeout") || error_str.contains("timed out") {
            return "The operation timed out. Please try again.".to_string();
        }

        format!("Unexpected error: {}", error)
    }

    fn format_timings_error(error: &TimingsError) -> String {
        match error {
            TimingsError::ProjectNotFound { client, project } => {
                format!("No project '{}' for client '{}'.", project, client)
            }
            TimingsError::UnknownRow { position } => {
                format!("There is no row #{} in the current view.", position)
            }
            TimingsError::UnknownCommand { command } => {
                format!("Unknown command '{}'. Type 'help' for a list.", command)
            }
            _ => error.to_string(),
        }
    }
}

/// Performance monitoring
pub struct PerformanceMonitor {
    operation: String,
    start: Instant,
    threshold_ms: u64,
}

impl PerformanceMonitor {
    pub fn new(operation: impl Into<String>, threshold_ms: u64) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
            threshold_ms,
        }
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        LogHelper::log_performance_warning(&self.operation, duration_ms, self.threshold_ms);

        debug!(
            operation = %self.operation,
            duration_ms = duration_ms,
            "Operation completed"
        );
    }
}
