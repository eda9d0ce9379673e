//! # Backup Engine - Local Backup Job Orchestrator
//!
//! A headless engine that runs directory-to-directory backup jobs.
//! Designed as the foundation for multiple front ends (CLI, monitors, automation).
//!
//! ## Overview
//!
//! The engine keeps a small registry of backup jobs and runs them, several
//! at a time if asked. It features:
//! - Complete and differential backups of whole directory trees
//! - Priority file types transferred ahead of everything else, across jobs
//! - Encryption of priority files through an external tool, one run at a time
//! - Pause, resume and cancel per job or for every job
//! - Automatic pause while a configured business application is running
//! - A live JSON snapshot of every running job for monitor processes
//!
//! ## Basic Usage
//!
//! ```no_run
//! use backup_engine::{BackupType, EngineConfig, JobEngine, ProgressState};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = JobEngine::from_config(EngineConfig::load_or_default())?;
//!
//! let id = engine.add_job("documents", "/home/me/docs", "/mnt/backup/docs", BackupType::Differential)?;
//!
//! let print = |state: &ProgressState| {
//!     println!("{}: {:.0}%", state.backup_name, state.progress_percentage);
//! };
//! let state = engine.execute_job(id, Some(&print))?;
//! println!("finished as {state}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **engine**: Job registry and concurrent execution
//! - **job**: Job entity, state machine and run lifecycle
//! - **strategy**: Complete and differential transfer algorithms
//! - **coordinator**: Cross-job priority file counter
//! - **encryption**: Serialized calls to the external encryption tool
//! - **lock**: OS-level named locks
//! - **config**: Engine settings
//! - **storage** / **state_store**: Registry persistence and live progress snapshot

pub mod config;
pub mod control;
pub mod coordinator;
pub mod detect;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod lock;
pub mod model;
pub mod progress;
pub mod selection;
pub mod state_store;
pub mod storage;
pub mod strategy;

// Re-export main types
pub use config::EngineConfig;
pub use control::{CancellationToken, PauseGate};
pub use coordinator::PriorityCoordinator;
pub use detect::{NoDetector, ProcessDetector, SystemProcessDetector};
pub use encryption::EncryptionGate;
pub use engine::{JobEngine, JobOutcome};
pub use error::{AdmissionError, EngineError};
pub use job::BackupJob;
pub use lock::NamedLock;
pub use model::{BackupType, JobRecord, JobState};
pub use progress::{NoProgress, ProgressCallback, ProgressState};
pub use selection::JobSelection;
pub use state_store::StateStore;
pub use storage::{JobRepository, JsonJobRepository, MemoryJobRepository};
pub use strategy::{BackupStrategy, ExecutionContext};
