use chrono::{Days, Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

use crate::services::error_handling::TimingsError;

pub const DEFAULT_DATE_RANGE: &str = "1 months";

/// Inclusive interval of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Day,
    Week,
    Month,
    Year,
}

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*(d|days?|w|weeks?|m|months?|y|years?)$").expect("valid regex")
    })
}

fn explicit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2})\s*(?:\.\.|to)\s*(\d{4}-\d{2}-\d{2})$").expect("valid regex")
    })
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// Parses a short range expression anchored at `today`.
    ///
    /// Accepted forms: `N days|weeks|months|years` (and the `d/w/m/y`
    /// abbreviations), `today`, `yesterday`, a single `YYYY-MM-DD`, and
    /// `YYYY-MM-DD..YYYY-MM-DD`.
    pub fn parse(input: &str, today: NaiveDate) -> Result<Self, TimingsError> {
        let text = input.trim().to_lowercase();
        let invalid = |reason: &str| TimingsError::InvalidDateRange {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("empty expression"));
        }

        match text.as_str() {
            "today" => return Ok(Self::single(today)),
            "yesterday" => {
                let day = today
                    .checked_sub_days(Days::new(1))
                    .ok_or_else(|| invalid("date out of range"))?;
                return Ok(Self::single(day));
            }
            _ => {}
        }

        if let Some(caps) = relative_pattern().captures(&text) {
            let amount: u32 = caps[1]
                .parse()
                .map_err(|_| invalid("amount is too large"))?;
            let unit = match &caps[2] {
                "d" | "day" | "days" => Unit::Day,
                "w" | "week" | "weeks" => Unit::Week,
                "m" | "month" | "months" => Unit::Month,
                _ => Unit::Year,
            };
            let from = match unit {
                Unit::Day => today.checked_sub_days(Days::new(amount as u64)),
                Unit::Week => today.checked_sub_days(Days::new(amount as u64 * 7)),
                Unit::Month => today.checked_sub_months(Months::new(amount)),
                Unit::Year => amount
                    .checked_mul(12)
                    .and_then(|months| today.checked_sub_months(Months::new(months))),
            }
            .ok_or_else(|| invalid("date out of range"))?;
            return Ok(Self::new(from, today));
        }

        if let Some(caps) = explicit_pattern().captures(&text) {
            let from = parse_day(&caps[1]).ok_or_else(|| invalid("invalid start date"))?;
            let to = parse_day(&caps[2]).ok_or_else(|| invalid("invalid end date"))?;
            if from > to {
                return Err(invalid("start is after end"));
            }
            return Ok(Self::new(from, to));
        }

        if let Some(day) = parse_day(&text) {
            return Ok(Self::single(day));
        }

        Err(invalid("unrecognised expression"))
    }

    /// Like [`DateRange::parse`], but never fails: unparseable input yields
    /// the default range ending today.
    pub fn parse_or_default(input: &str, today: NaiveDate) -> Self {
        match Self::parse(input, today) {
            Ok(range) => range,
            Err(e) => {
                debug!(error = %e, "Falling back to default date range");
                Self::default_for(today)
            }
        }
    }

    pub fn default_for(today: NaiveDate) -> Self {
        let from = today
            .checked_sub_months(Months::new(1))
            .unwrap_or(today);
        Self::new(from, today)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from <= day && day <= self.to
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

fn parse_day(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}
