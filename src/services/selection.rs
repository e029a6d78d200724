use std::collections::HashSet;

use crate::domain::RowKey;

/// State of the "select all" checkbox in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Unchecked,
    Indeterminate,
    Checked,
}

/// Checked rows of the table.
///
/// Keys of rows that are no longer visible may linger in the set; every
/// count that drives the header checkbox only looks at visible rows.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    selected: HashSet<RowKey>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle_one(&mut self, key: &RowKey) {
        if !self.selected.remove(key) {
            self.selected.insert(key.clone());
        }
    }

    /// Clears the selection when every visible row is selected, otherwise
    /// selects exactly the visible rows.
    pub fn toggle_all(&mut self, visible: &[RowKey]) {
        let live = self.count_in(visible);
        if live == visible.len() && live > 0 {
            self.selected.clear();
        } else {
            self.selected = visible.iter().cloned().collect();
        }
    }

    pub fn is_selected(&self, key: &RowKey) -> bool {
        self.selected.contains(key)
    }

    pub fn count_in(&self, visible: &[RowKey]) -> usize {
        visible.iter().filter(|k| self.selected.contains(k)).count()
    }

    /// Selected keys among `visible`, in visible order.
    pub fn selected_in<'a>(&self, visible: &'a [RowKey]) -> Vec<&'a RowKey> {
        visible.iter().filter(|k| self.selected.contains(k)).collect()
    }

    pub fn check_state(&self, visible: &[RowKey]) -> CheckState {
        let live = self.count_in(visible);
        if live == 0 {
            CheckState::Unchecked
        } else if live < visible.len() {
            CheckState::Indeterminate
        } else {
            CheckState::Checked
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Size of the raw set, stale keys included.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
