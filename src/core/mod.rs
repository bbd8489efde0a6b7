//! Core functionality for the label search.
//!
//! This module contains:
//! - Window planning over an entity's time-sorted records
//! - The label search engine and labeling function wrappers
//! - The label table and the transforms that derive new tables
//! - Built-in aggregations used as labeling functions by the CLI

pub mod aggregate;
pub mod describe;
pub mod labels;
pub mod search;
pub mod transforms;
pub mod windowing;

// Re-export commonly used types
pub use aggregate::Aggregation;
pub use describe::{ContinuousSummary, CountAtTime, Distribution};
pub use labels::{
    LabelRow, LabelTimes, LabelType, SearchSettings, TransformRecord, LABELS_FILE, SETTINGS_FILE,
};
pub use search::{
    DataSlice, LabelArgs, LabelFn, LabelMaker, LabelOutput, SearchOptions, SlicedEntity,
};
pub use transforms::{bin_edges, BinOptions, Bins, Comparison, SampleOptions, SampleSize};
pub use windowing::{
    format_duration, parse_duration, MaximumData, MinimumData, Window, WindowSize,
};
