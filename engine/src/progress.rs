//! Progress reporting.
//!
//! Every step of a job run produces a fresh `ProgressState` value which is
//! handed to a `ProgressCallback`. The engine routes it to the `StateStore`
//! first and then to whatever callback the caller supplied, so front ends
//! (CLI, GUI, a remote monitor) stay decoupled from the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::JobState;

/// Snapshot of one job's transfer status at a single point in time.
///
/// Field names are serialized in PascalCase because the snapshot file is read
/// by monitor processes that expect that layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgressState {
    pub backup_name: String,
    pub state: JobState,
    pub total_files: u64,
    /// Total bytes across all enumerated files
    pub total_size: u64,
    pub files_remaining: u64,
    pub size_remaining: u64,
    pub current_source_file: Option<PathBuf>,
    pub current_target_file: Option<PathBuf>,
    /// 0-100, from files processed over total files
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressState {
    /// Percentage of files processed; an empty job counts as fully done.
    pub fn percentage(total_files: u64, files_remaining: u64) -> f64 {
        if total_files == 0 {
            return 100.0;
        }
        let processed = total_files.saturating_sub(files_remaining);
        processed as f64 * 100.0 / total_files as f64
    }
}

/// Receiver for progress snapshots.
///
/// Called synchronously on the job's worker thread. A slow implementation
/// stalls that job, so hand work off to a channel if it might block.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, state: &ProgressState);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressState) + Send + Sync,
{
    fn on_progress(&self, state: &ProgressState) {
        self(state)
    }
}

/// Callback that drops every update.
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _state: &ProgressState) {}
}
