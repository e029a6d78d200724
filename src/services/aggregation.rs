use serde::Serialize;

use crate::domain::{FilterState, RawRow, Row};
use crate::services::expression::{Filter, Transform};

/// Rows that survived filtering, with column totals over exactly those rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedRows {
    pub rows: Vec<Row>,
    pub total_raw: f64,
    pub total_transformed: f64,
}

impl AggregatedRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Compiled form of the client-side part of a [`FilterState`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    transform: Transform,
    filter: Filter,
    client: String,
    project: String,
}

impl Pipeline {
    pub fn new(state: &FilterState) -> Self {
        Self {
            transform: Transform::compile(&state.transform),
            filter: Filter::compile(&state.filter),
            client: state.client.trim().to_lowercase(),
            project: state.project.trim().to_lowercase(),
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Transforms, filters and totals `rows`.
    ///
    /// A filter expression that fails to evaluate excludes the row, same as
    /// one that evaluates to `false`.
    pub fn apply(&self, rows: &[RawRow]) -> AggregatedRows {
        let mut out = AggregatedRows::default();
        for raw in rows {
            let transformed = self.transform.eval(raw.total);
            if !self.filter.eval(raw.total).is_pass() {
                continue;
            }
            if !contains_ignore_case(&raw.client, &self.client)
                || !contains_ignore_case(&raw.project, &self.project)
            {
                continue;
            }
            out.total_raw += raw.total;
            out.total_transformed += transformed.or_zero();
            out.rows.push(Row::from_raw(raw, transformed));
        }
        out
    }
}

/// `needle` must already be lowercase.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(needle)
}

/// One-shot form of [`Pipeline::apply`].
pub fn aggregate(rows: &[RawRow], state: &FilterState) -> AggregatedRows {
    Pipeline::new(state).apply(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FilterField, Transformed};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn sample_rows() -> Vec<RawRow> {
        vec![
            RawRow::new(day(1), "Acme Corp", "Website", 1.0),
            RawRow::new(day(2), "Acme Corp", "Mobile App", 2.0),
            RawRow::new(day(3), "Globex", "Website", 3.0),
        ]
    }

    fn state_with(field: FilterField, value: &str) -> FilterState {
        let mut state = FilterState::default();
        state.set(field, value);
        state
    }

    #[test]
    fn test_doubling_transform_totals() {
        let result = aggregate(&sample_rows(), &state_with(FilterField::Transform, "x*2"));
        assert_eq!(result.len(), 3);
        assert_eq!(result.total_raw, 6.0);
        assert_eq!(result.total_transformed, 12.0);
        assert_eq!(result.rows[1].transformed, Transformed::Value(4.0));
    }

    #[test]
    fn test_filter_expression_excludes_rows_and_totals() {
        let result = aggregate(&sample_rows(), &state_with(FilterField::Filter, "x >= 2"));
        assert_eq!(result.len(), 2);
        assert_eq!(result.total_raw, 5.0);
        assert_eq!(result.total_transformed, 5.0);
    }

    #[test]
    fn test_filter_errors_exclude_every_row() {
        let result = aggregate(&sample_rows(), &state_with(FilterField::Filter, "x >"));
        assert!(result.is_empty());
        assert_eq!(result.total_raw, 0.0);
    }

    #[test]
    fn test_transform_errors_keep_rows_but_count_zero() {
        let result = aggregate(&sample_rows(), &state_with(FilterField::Transform, "x / (x - 2)"));
        assert_eq!(result.len(), 3);
        assert_eq!(result.rows[1].transformed, Transformed::Error);
        // 1/(1-2) + 3/(3-2)
        assert_eq!(result.total_transformed, 2.0);
        assert_eq!(result.total_raw, 6.0);
    }

    #[test]
    fn test_substring_filters_are_case_insensitive() {
        let mut state = state_with(FilterField::Client, "acme");
        let result = aggregate(&sample_rows(), &state);
        assert_eq!(result.len(), 2);

        state.set(FilterField::Project, "WEB");
        let result = aggregate(&sample_rows(), &state);
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0].day, day(1));
        assert_eq!(result.total_raw, 1.0);
    }

    #[test]
    fn test_empty_input() {
        let result = aggregate(&[], &FilterState::default());
        assert_eq!(result, AggregatedRows::default());
    }
}
