//! Progress reporting for label searches.
//!
//! Tracks entities, windows and labels processed; the `verbose` search flag
//! logs these through `tracing`.

pub mod stats;

pub use stats::{create_shared_progress, SearchProgress, SearchStats, SharedProgress};
