//! Core data model for backup jobs.
//!
//! - BackupType: which strategy a job runs
//! - JobState: lifecycle of a job
//! - JobRecord: the persisted, plain-data view of a job

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// How a job decides which files to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    /// Copy every file
    Complete,
    /// Copy only files that are new, newer, or changed in size
    Differential,
    /// Reserved; selecting it fails the run
    Incremental,
}

impl BackupType {
    /// Parse a type name, case-insensitively.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "complete" | "full" => Some(Self::Complete),
            "differential" | "diff" => Some(Self::Differential),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "Complete"),
            Self::Differential => write!(f, "Differential"),
            Self::Incremental => write!(f, "Incremental"),
        }
    }
}

/// Lifecycle state of a job.
///
/// `Paused` is transient: it is only observed while a run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Never run since it was loaded or created
    Inactive,
    /// A run is in progress
    Active,
    /// A run is in progress but waiting
    Paused,
    /// Last run finished
    Completed,
    /// Last run failed or was cancelled
    Error,
}

impl JobState {
    /// True while a worker owns the job.
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Active | JobState::Paused)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "Inactive",
            Self::Active => "Active",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Persisted view of a job.
///
/// Run controls and the strategy are never part of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRecord {
    pub id: u32,
    pub name: String,
    pub source_directory: PathBuf,
    pub target_directory: PathBuf,
    #[serde(rename = "Type")]
    pub backup_type: BackupType,
    #[serde(default)]
    pub last_execution: Option<DateTime<Local>>,
    #[serde(default = "default_state")]
    pub state: JobState,
}

fn default_state() -> JobState {
    JobState::Inactive
}
