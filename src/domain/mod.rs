pub mod date_range;
pub mod filter_state;
pub mod row;
pub mod summary;

pub use date_range::DateRange;
pub use filter_state::{FilterField, FilterState, QueryParams};
pub use row::{RawRow, Row, RowKey, Transformed};
pub use summary::{SummaryUpdate, WriteOutcome};
