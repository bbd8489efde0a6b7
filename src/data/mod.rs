//! Input data for the label search.
//!
//! Records are plain field maps; the loader reads them from JSON and
//! normalises the time index.

pub mod loader;
pub mod types;

// Re-export commonly used types
pub use loader::{load_records, parse_records, parse_timestamp, parse_timezone, LoadOptions};
pub use types::{EntityId, Record, Value, ValueKey};
