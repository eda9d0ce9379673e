//! Error types for the backup engine.
//!
//! `EngineError` covers job-level failures: anything that stops a run or an
//! engine operation. Per-file copy failures are not errors at this level; they
//! are logged by the strategy and the run carries on.
//!
//! `AdmissionError` is the failure signal for registry admission
//! (`add_job` / `update_job`). It never changes engine state.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::BackupType;

/// Job-level errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// The selected backup type has no strategy
    #[error("Backup type {backup_type} is not implemented")]
    NotImplemented { backup_type: BackupType },

    /// Failed to enumerate source directory
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to read from source file
    #[error("Failed to read file: {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to target file
    #[error("Failed to write file: {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// No job with this id in the registry
    #[error("No backup job with id {id}")]
    JobNotFound { id: u32 },

    /// The job is already running
    #[error("Backup job '{name}' is already active")]
    JobAlreadyActive { name: String },

    /// The worker thread for a job could not be started
    #[error("Failed to start worker for backup job '{name}'")]
    WorkerSpawn { name: String, source: io::Error },

    /// The worker thread for a job panicked
    #[error("Worker for backup job '{name}' panicked")]
    WorkerPanicked { name: String },

    /// Job selection string could not be parsed
    #[error("Invalid job selection '{input}': {reason}")]
    InvalidSelection { input: String, reason: String },

    /// The encryption tool could not be launched or awaited
    #[error("Encryption tool {} failed", tool.display())]
    Encryption { tool: PathBuf, source: io::Error },

    /// A named lock could not be opened or acquired
    #[error("Failed to acquire lock {name}")]
    Lock { name: String, source: io::Error },

    /// Configuration file could not be read or parsed
    #[error("Invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    /// Job registry or state snapshot could not be stored or loaded
    #[error("Failed to persist {}", path.display())]
    Persistence { path: PathBuf, source: io::Error },

    /// Snapshot contents could not be (de)serialized
    #[error("Malformed data in {}", path.display())]
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Why a job was refused by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Job {field} must not be blank")]
    BlankField { field: &'static str },

    #[error("Registry is full ({max} jobs)")]
    AtCapacity { max: usize },

    #[error("No backup job with id {id}")]
    UnknownJob { id: u32 },

    #[error("Backup job {id} is active and cannot be modified")]
    JobActive { id: u32 },
}
