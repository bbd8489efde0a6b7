//! Error types for label search and label table transforms.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, LabelError>;

/// Error type returned by labeling functions.
pub type LabelFnError = Box<dyn std::error::Error + Send + Sync>;

/// Label search error types
#[derive(Error, Debug)]
pub enum LabelError {
    /// An entity's records are not sorted by the time index
    #[error(
        "records for entity '{entity}' are not sorted by time: \
         position {position} has {current} after {previous}"
    )]
    UnsortedInput {
        /// Entity whose partition is out of order
        entity: String,
        /// Position inside the entity partition
        position: usize,
        /// Timestamp of the preceding record
        previous: DateTime<Utc>,
        /// Offending timestamp
        current: DateTime<Utc>,
    },

    /// Invalid or contradictory parameters, detected before processing
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A labeling function failed on a window
    #[error(
        "labeling function '{function}' failed for entity '{entity}' \
         at cutoff {cutoff_time}: {source}"
    )]
    LabelingFunction {
        /// Name of the labeling function
        function: String,
        /// Entity being labeled
        entity: String,
        /// Cutoff time of the failing window
        cutoff_time: DateTime<Utc>,
        /// Error raised by the function
        #[source]
        source: LabelFnError,
    },

    /// An input record is missing a required field or has the wrong type
    #[error("invalid record at index {index}: {reason}")]
    InvalidRecord {
        /// Index of the record in the input
        index: usize,
        /// What is wrong with it
        reason: String,
    },

    /// A transform was applied to a label column of an unsupported type
    #[error("label column '{column}' must be {expected}, found {found}")]
    LabelType {
        /// Label column
        column: String,
        /// Expected value kind
        expected: &'static str,
        /// Value kind found
        found: String,
    },

    /// Duration, timestamp or configuration parsing error
    #[error("parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabelError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LabelError::Configuration(msg.into())
    }
}
