//! Search progress counters.
//!
//! Counters are atomics so a caller holding the shared handle can poll them
//! while a search is running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Progress of a label search.
#[derive(Debug)]
pub struct SearchProgress {
    /// Number of entities in the input
    entities_total: AtomicU64,
    /// Number of entities fully searched
    entities_searched: AtomicU64,
    /// Number of windows handed to labeling functions
    windows_evaluated: AtomicU64,
    /// How many of those windows were empty
    empty_windows: AtomicU64,
    /// Number of label rows produced
    labels_emitted: AtomicU64,
    /// When the counters were created
    started: DateTime<Utc>,
}

impl Default for SearchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchProgress {
    pub fn new() -> Self {
        Self {
            entities_total: AtomicU64::new(0),
            entities_searched: AtomicU64::new(0),
            windows_evaluated: AtomicU64::new(0),
            empty_windows: AtomicU64::new(0),
            labels_emitted: AtomicU64::new(0),
            started: Utc::now(),
        }
    }

    pub fn set_entities_total(&self, total: u64) {
        self.entities_total.store(total, Ordering::Relaxed);
    }

    /// Record a window passed to the labeling functions.
    pub fn record_window(&self, empty: bool) {
        self.windows_evaluated.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_windows.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a finished entity and the labels it produced.
    pub fn record_entity(&self, labels: u64) {
        self.entities_searched.fetch_add(1, Ordering::Relaxed);
        self.labels_emitted.fetch_add(labels, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> SearchStats {
        SearchStats {
            entities_total: self.entities_total.load(Ordering::Relaxed),
            entities_searched: self.entities_searched.load(Ordering::Relaxed),
            windows_evaluated: self.windows_evaluated.load(Ordering::Relaxed),
            empty_windows: self.empty_windows.load(Ordering::Relaxed),
            labels_emitted: self.labels_emitted.load(Ordering::Relaxed),
            started: self.started,
            elapsed_ms: (Utc::now() - self.started).num_milliseconds().max(0) as u64,
        }
    }

    /// Fraction of entities searched, between 0 and 1.
    pub fn fraction_done(&self) -> f64 {
        let stats = self.stats();
        if stats.entities_total == 0 {
            return 1.0;
        }
        stats.entities_searched as f64 / stats.entities_total as f64
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Search Statistics:\n\
             - Entities searched: {}/{}\n\
             - Windows evaluated: {} ({} empty)\n\
             - Labels emitted: {}\n\
             - Elapsed: {} ms",
            stats.entities_searched,
            stats.entities_total,
            stats.windows_evaluated,
            stats.empty_windows,
            stats.labels_emitted,
            stats.elapsed_ms
        )
    }
}

/// Snapshot of [`SearchProgress`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    pub entities_total: u64,
    pub entities_searched: u64,
    pub windows_evaluated: u64,
    pub empty_windows: u64,
    pub labels_emitted: u64,
    pub started: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Thread-safe shared progress handle.
pub type SharedProgress = Arc<SearchProgress>;

/// Create a new shared progress handle.
pub fn create_shared_progress() -> SharedProgress {
    Arc::new(SearchProgress::new())
}
