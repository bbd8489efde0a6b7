//! Label Maker - window label search over time-indexed event data.
//!
//! This library slides a time window over each entity's records, evaluates a
//! labeling function on every window and collects the results into a label
//! table that remembers how it was made.
//!
//! # Guarantees
//!
//! - **Deterministic**: the same records and parameters give the same table
//! - **Half-open windows**: a window covers `[cutoff, cutoff + window_size)`
//! - **Provenance**: every table carries its search settings and transform history
//! - **Immutability**: transforms return new tables
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Label Maker                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Loader    │──▶│  Windowing  │──▶│   Search    │       │
//! │  │   (JSON)    │   │  (cutoffs)  │   │ (label fns) │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                              │              │
//! │         ┌────────────────────────────────────┘              │
//! │         ▼                                                   │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ LabelTimes  │──▶│ Transforms  │──▶│  Describe   │       │
//! │  │  (table)    │   │ (threshold) │   │  (summary)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use label_maker::{DataSlice, LabelFn, LabelMaker, Record, SearchOptions};
//!
//! let at = |m| Utc.with_ymd_and_hms(2014, 1, 1, 0, m, 0).unwrap();
//! let records = vec![
//!     Record::new().with("customer_id", 1i64).with("time", at(0)).with("amount", 20.0),
//!     Record::new().with("customer_id", 1i64).with("time", at(5)).with("amount", 30.0),
//! ];
//!
//! let total = LabelFn::new("total_spent", |slice: &DataSlice<'_>| Ok(slice.sum("amount")));
//! let lm = LabelMaker::new("customer_id", "time", total, "1h".parse().unwrap());
//! let labels = lm.search(&records, &SearchOptions::default()).unwrap();
//!
//! assert_eq!(labels.len(), 1);
//! let labels = labels.threshold(40.0).unwrap();
//! println!("{}", labels.describe());
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod progress;

// Re-export key types at crate root for convenience
pub use config::SearchConfig;
pub use core::{
    Aggregation, BinOptions, Bins, Comparison, DataSlice, LabelFn, LabelMaker, LabelOutput,
    LabelTimes, LabelType, MaximumData, MinimumData, SampleOptions, SampleSize, SearchOptions,
    WindowSize,
};
pub use data::{EntityId, Record, Value};
pub use error::{LabelError, Result};
pub use progress::{create_shared_progress, SearchProgress, SharedProgress};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
