//! Mirrors filter fields into a shareable query string.
//!
//! Fields holding their default value are left out so shared links stay
//! short; reading a missing key yields the default.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{FilterField, FilterState};

// Unreserved characters per RFC 3986 stay readable; space is encoded as '+'.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

/// Key/value store that outlives the view, such as a link's query string.
pub trait FilterStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    params: BTreeMap<String, String>,
}

impl QueryString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1&b=two+words`; a leading `?` is ignored, later duplicates win.
    pub fn parse(input: &str) -> Self {
        let input = input.trim().trim_start_matches('?');
        let mut params = BTreeMap::new();
        for pair in input.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(decode(key), decode(value));
        }
        Self { params }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }
}

fn decode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

fn encode(text: &str) -> String {
    utf8_percent_encode(text, QUERY_VALUE)
        .to_string()
        .replace(' ', "+")
}

impl fmt::Display for QueryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.params {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{}={}", encode(key), encode(value))?;
        }
        Ok(())
    }
}

impl FilterStore for QueryString {
    fn get(&self, key: &str) -> Option<String> {
        self.params.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.params.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.params.remove(key);
    }
}

/// One field bound to its store key and default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedField {
    pub key: &'static str,
    pub default: &'static str,
}

impl PersistedField {
    pub fn for_field(field: FilterField) -> Self {
        Self {
            key: field.key(),
            default: field.default_value(),
        }
    }

    pub fn load(&self, store: &dyn FilterStore) -> String {
        store
            .get(self.key)
            .unwrap_or_else(|| self.default.to_string())
    }

    pub fn save(&self, store: &mut dyn FilterStore, value: &str) {
        if value == self.default || value.is_empty() {
            store.remove(self.key);
        } else {
            store.set(self.key, value);
        }
    }
}

/// Loads and saves a whole [`FilterState`].
pub struct PersistedFilters;

impl PersistedFilters {
    pub fn load(store: &dyn FilterStore) -> FilterState {
        let mut state = FilterState::default();
        for field in FilterField::ALL {
            state.set(field, PersistedField::for_field(field).load(store));
        }
        state
    }

    pub fn save(store: &mut dyn FilterStore, state: &FilterState) {
        for field in FilterField::ALL {
            Self::save_field(store, field, state.get(field));
        }
    }

    pub fn save_field(store: &mut dyn FilterStore, field: FilterField, value: &str) {
        PersistedField::for_field(field).save(store, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let state = PersistedFilters::load(&QueryString::new());
        assert_eq!(state, FilterState::default());
    }

    #[test]
    fn test_default_values_are_removed_from_store() {
        let mut store = QueryString::parse("client=acme&range=2+weeks");
        PersistedFilters::save_field(&mut store, FilterField::DateRange, "1 months");
        PersistedFilters::save_field(&mut store, FilterField::Client, "");
        assert!(store.is_empty());
    }

    #[test]
    fn test_round_trip_through_link() {
        let mut state = FilterState::default();
        state.set(FilterField::Client, "Acme & Sons");
        state.set(FilterField::Transform, "r(x * 1.5, 2)");
        state.set(FilterField::Filter, "x >= 2 && x < 10");

        let mut store = QueryString::new();
        PersistedFilters::save(&mut store, &state);
        assert_eq!(store.len(), 3);

        let link = store.to_string();
        assert!(!link.contains("range="));
        assert!(link.contains("client=Acme+%26+Sons"));

        let restored = PersistedFilters::load(&QueryString::parse(&link));
        assert_eq!(restored, state);
    }

    #[test]
    fn test_parse_handles_prefix_and_bare_keys() {
        let store = QueryString::parse("?project=web%20app&flag&client=a&client=b");
        assert_eq!(store.get("project").as_deref(), Some("web app"));
        assert_eq!(store.get("flag").as_deref(), Some(""));
        assert_eq!(store.get("client").as_deref(), Some("b"));
    }

    #[test]
    fn test_field_binding_uses_field_defaults() {
        let field = PersistedField::for_field(FilterField::DateRange);
        assert_eq!(field.key, "range");
        assert_eq!(field.load(&QueryString::new()), "1 months");

        let mut store = QueryString::new();
        field.save(&mut store, "7 days");
        assert_eq!(store.to_string(), "range=7+days");
    }
}
