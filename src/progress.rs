//! Progress-callback trait for per-entry harvest events.
//!
//! Inject an [`Arc<dyn HarvestProgressCallback>`] via
//! [`crate::config::HarvestConfigBuilder::progress_callback`] to follow a run
//! as it walks the manifest: a terminal progress bar, a metrics exporter or a
//! test recorder all plug in the same way, and the library stays unaware of how
//! the host reports progress.
//!
//! # Example
//!
//! ```rust
//! use pmc_captions::{HarvestConfig, HarvestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     skipped: AtomicUsize,
//! }
//!
//! impl HarvestProgressCallback for CountingCallback {
//!     fn on_entry_skipped(&self, _index: usize, _total: usize, pmcid: &str, reason: &str) {
//!         self.skipped.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("skip {pmcid}: {reason}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { skipped: AtomicUsize::new(0) });
//!
//! let config = HarvestConfig::builder()
//!     .progress_callback(counter as Arc<dyn HarvestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::harvest::HarvestStats;
use std::sync::Arc;

/// Called by the orchestrator as it processes each manifest entry.
///
/// Entries are processed one at a time, so calls never overlap within a run.
/// Implementations are still `Send + Sync` so the callback can be shared
/// with other tasks (a ticking progress bar, a reporter thread).
/// All methods default to no-ops.
pub trait HarvestProgressCallback: Send + Sync {
    /// Called once after the manifest is read.
    ///
    /// # Arguments
    /// * `name`         : manifest file name, used as the run label
    /// * `total_entries`: entries that will be attempted (after the subset cap)
    fn on_harvest_start(&self, name: &str, total_entries: usize) {
        let _ = (name, total_entries);
    }

    /// Called before an entry is retrieved. `index` is 1-based.
    fn on_entry_start(&self, index: usize, total: usize, pmcid: &str) {
        let _ = (index, total, pmcid);
    }

    /// Called when an entry produced at least one new record.
    fn on_entry_written(&self, index: usize, total: usize, pmcid: &str, records: usize) {
        let _ = (index, total, pmcid, records);
    }

    /// Called when an entry is counted as skipped.
    ///
    /// `reason` is a human-readable description of the entry-level failure,
    /// or of why no new record came out of it.
    fn on_entry_skipped(&self, index: usize, total: usize, pmcid: &str, reason: &str) {
        let _ = (index, total, pmcid, reason);
    }

    /// Called when a single figure is dropped while its entry continues.
    fn on_caption_skipped(&self, pmcid: &str, fig_id: &str, reason: &str) {
        let _ = (pmcid, fig_id, reason);
    }

    /// Called once after every entry has been attempted.
    fn on_harvest_complete(&self, name: &str, stats: &HarvestStats) {
        let _ = (name, stats);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl HarvestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::HarvestConfig`].
pub type ProgressCallback = Arc<dyn HarvestProgressCallback>;
