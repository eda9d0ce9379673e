//! Backup strategies.
//!
//! Both strategies share one run template (pre-flight, business-software
//! wait, ordered per-file loop, final report) and differ only in the per-file
//! copy decision:
//! - Complete copies every file.
//! - Differential copies a file if the target is missing, the source is
//!   strictly newer, or the sizes differ.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::control::{CancellationToken, PauseGate};
use crate::coordinator::PriorityCoordinator;
use crate::detect::{NoDetector, ProcessDetector};
use crate::encryption::{EncryptionGate, EXIT_FAILED};
use crate::error::EngineError;
use crate::fs_ops::{self, SourceFile};
use crate::job::BackupJob;
use crate::model::{BackupType, JobState};
use crate::progress::{ProgressCallback, ProgressState};

/// Target for "file transferred" records.
pub const TRANSFER_LOG_TARGET: &str = "backup_engine::transfer";

/// How often a user-paused job checks for cancellation.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Services shared by every job run.
#[derive(Clone)]
pub struct ExecutionContext {
    pub config: Arc<EngineConfig>,
    pub coordinator: Arc<PriorityCoordinator>,
    pub encryption: Option<Arc<EncryptionGate>>,
    pub detector: Arc<dyn ProcessDetector>,
}

impl ExecutionContext {
    /// Context with a private coordinator, no process detection, and a gate
    /// for the configured tool, installed or not.
    pub fn new(config: EngineConfig) -> Self {
        let encryption = config
            .encryption_tool()
            .map(|tool| Arc::new(EncryptionGate::new(tool)));
        Self {
            config: Arc::new(config),
            coordinator: Arc::new(PriorityCoordinator::new()),
            encryption,
            detector: Arc::new(NoDetector),
        }
    }
}

/// How a strategy run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// One run of one job, as seen by its strategy.
pub struct JobRun<'a> {
    pub job: &'a BackupJob,
    pub name: &'a str,
    pub source: &'a Path,
    pub target: &'a Path,
    pub cancel: &'a CancellationToken,
    pub pause: &'a PauseGate,
}

/// Per-file copy policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStrategy {
    Complete,
    Differential,
}

impl BackupStrategy {
    /// Pick the strategy for a backup type.
    pub fn for_type(backup_type: BackupType) -> Result<Self, EngineError> {
        match backup_type {
            BackupType::Complete => Ok(Self::Complete),
            BackupType::Differential => Ok(Self::Differential),
            BackupType::Incremental => Err(EngineError::NotImplemented { backup_type }),
        }
    }

    /// Whether `file` must be copied to `target`.
    pub fn should_copy(&self, file: &SourceFile, target: &Path) -> bool {
        match self {
            Self::Complete => true,
            Self::Differential => has_changed(file, target),
        }
    }

    /// Run the full template for one job.
    pub fn run(
        &self,
        run: &JobRun<'_>,
        ctx: &ExecutionContext,
        progress: &dyn ProgressCallback,
    ) -> Result<RunOutcome, EngineError> {
        if !run.source.is_dir() {
            let err = EngineError::SourceNotFound {
                path: run.source.to_path_buf(),
            };
            warn!(error = %err, "source directory missing");
            return Err(err);
        }
        fs_ops::ensure_dir(run.target)?;

        let config = &ctx.config;
        let threshold = config.large_file_threshold();
        let encryptor = ctx
            .encryption
            .as_deref()
            .filter(|gate| gate.tool().exists());
        let priority_poll = config.priority_poll_interval();

        let (priority, bulk): (Vec<SourceFile>, Vec<SourceFile>) = fs_ops::enumerate_files(run.source)?
            .into_iter()
            .partition(|f| config.is_priority(&f.path));
        let priority_count = priority.len();
        let work: Vec<(SourceFile, bool)> = priority
            .into_iter()
            .map(|f| (f, true))
            .chain(bulk.into_iter().map(|f| (f, false)))
            .collect();

        let mut lease = ctx.coordinator.register(priority_count);
        let mut tracker = Tracker::new(run.name, &work);
        info!(
            files = tracker.total_files,
            bytes = tracker.total_size,
            priority = priority_count,
            strategy = ?self,
            "source enumerated"
        );

        if wait_for_business_software(run, ctx, &tracker, progress) {
            lease.release_all();
            return Ok(cancelled(run, &tracker, progress));
        }
        run.job.set_state(JobState::Active);
        progress.on_progress(&tracker.snapshot(JobState::Active, None));

        for (file, is_priority) in &work {
            if run.cancel.is_cancelled() {
                return Ok(cancelled(run, &tracker, progress));
            }
            if run.pause.is_paused() && wait_while_user_paused(run, &tracker, progress) {
                return Ok(cancelled(run, &tracker, progress));
            }

            let target_path = file.target_in(run.target);
            tracker.current = Some((file.path.clone(), target_path.clone()));

            if self.should_copy(file, &target_path) {
                let large = threshold.is_some_and(|limit| file.size > limit);
                if large && !is_priority && ctx.coordinator.pending() > 0 {
                    debug!(path = %file.path.display(), "large file waiting for priority files");
                    if ctx.coordinator.wait_until_clear(run.cancel, priority_poll) {
                        return Ok(cancelled(run, &tracker, progress));
                    }
                }
                let encrypt_with = encryptor.filter(|_| *is_priority);
                transfer(run.name, file, &target_path, encrypt_with, &config.crypto_key);
            } else {
                debug!(path = %file.path.display(), "unchanged, skipped");
            }

            if *is_priority {
                lease.complete_one();
            }
            tracker.advance(file);
            progress.on_progress(&tracker.snapshot(JobState::Active, None));
        }

        tracker.current = None;
        let mut done = tracker.snapshot(JobState::Completed, None);
        done.progress_percentage = 100.0;
        progress.on_progress(&done);
        Ok(RunOutcome::Completed)
    }
}

/// Differential decision: metadata only, never content.
fn has_changed(file: &SourceFile, target: &Path) -> bool {
    let Ok(existing) = fs::metadata(target) else {
        return true;
    };
    if existing.len() != file.size {
        return true;
    }
    match (file.modified, existing.modified().ok()) {
        (Some(source_time), Some(target_time)) => source_time > target_time,
        _ => true,
    }
}

/// Copy one file, encrypt it if asked, and log the transfer.
///
/// Failures are logged and swallowed; one bad file never fails the job.
fn transfer(
    job: &str,
    file: &SourceFile,
    target: &Path,
    encryptor: Option<&EncryptionGate>,
    key: &str,
) {
    let started = Instant::now();
    let bytes = match fs_ops::copy_file_with_metadata(&file.path, target) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(
                source_path = %file.path.display(),
                target_path = %target.display(),
                error = %e,
                "file transfer failed"
            );
            return;
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let encryption_ms = match encryptor {
        Some(gate) => match gate.encrypt(target, key) {
            Ok(code) => code,
            Err(e) => {
                error!(target_path = %target.display(), error = %e, "encryption failed");
                EXIT_FAILED
            }
        },
        None => 0,
    };
    if encryption_ms < 0 {
        warn!(target_path = %target.display(), code = encryption_ms, "encryption tool reported an error");
    }

    info!(
        target: TRANSFER_LOG_TARGET,
        job,
        source_path = %file.path.display(),
        target_path = %target.display(),
        size = bytes,
        elapsed_ms,
        encryption_ms,
        "file transferred"
    );
}

/// Park while the business software runs. Returns `true` if cancelled.
fn wait_for_business_software(
    run: &JobRun<'_>,
    ctx: &ExecutionContext,
    tracker: &Tracker<'_>,
    progress: &dyn ProgressCallback,
) -> bool {
    let Some(process) = ctx.config.business_software() else {
        return false;
    };
    let poll = ctx.config.business_poll_interval();

    let mut announced = false;
    while ctx.detector.is_running(process) {
        if !announced {
            info!(process, "business software running, job paused");
            announced = true;
        }
        run.job.set_state(JobState::Paused);
        let message = format!("Paused: business software '{process}' is running");
        progress.on_progress(&tracker.snapshot(JobState::Paused, Some(message)));
        if run.cancel.sleep(poll) {
            return true;
        }
    }
    if announced {
        info!(process, "business software exited, job resumed");
    }
    run.cancel.is_cancelled()
}

/// Park on the job's pause gate. Returns `true` if cancelled.
fn wait_while_user_paused(
    run: &JobRun<'_>,
    tracker: &Tracker<'_>,
    progress: &dyn ProgressCallback,
) -> bool {
    info!("job paused");
    run.job.set_state(JobState::Paused);
    progress.on_progress(&tracker.snapshot(JobState::Paused, Some("Paused by user".to_string())));

    if run.pause.wait_while_paused(run.cancel, PAUSE_POLL) {
        return true;
    }
    info!("job resumed");
    run.job.set_state(JobState::Active);
    progress.on_progress(&tracker.snapshot(JobState::Active, None));
    false
}

fn cancelled(run: &JobRun<'_>, tracker: &Tracker<'_>, progress: &dyn ProgressCallback) -> RunOutcome {
    warn!(job = run.name, "job cancelled");
    progress.on_progress(&tracker.snapshot(JobState::Error, Some("Cancelled".to_string())));
    RunOutcome::Cancelled
}

/// Running totals for one job, turned into fresh `ProgressState` values.
struct Tracker<'a> {
    name: &'a str,
    total_files: u64,
    total_size: u64,
    files_remaining: u64,
    size_remaining: u64,
    current: Option<(PathBuf, PathBuf)>,
}

impl<'a> Tracker<'a> {
    fn new(name: &'a str, work: &[(SourceFile, bool)]) -> Self {
        let total_files = work.len() as u64;
        let total_size = work.iter().map(|(f, _)| f.size).sum();
        Self {
            name,
            total_files,
            total_size,
            files_remaining: total_files,
            size_remaining: total_size,
            current: None,
        }
    }

    fn advance(&mut self, file: &SourceFile) {
        self.files_remaining = self.files_remaining.saturating_sub(1);
        self.size_remaining = self.size_remaining.saturating_sub(file.size);
    }

    fn snapshot(&self, state: JobState, message: Option<String>) -> ProgressState {
        let (current_source_file, current_target_file) = match &self.current {
            Some((source, target)) => (Some(source.clone()), Some(target.clone())),
            None => (None, None),
        };
        ProgressState {
            backup_name: self.name.to_string(),
            state,
            total_files: self.total_files,
            total_size: self.total_size,
            files_remaining: self.files_remaining,
            size_remaining: self.size_remaining,
            current_source_file,
            current_target_file,
            progress_percentage: ProgressState::percentage(self.total_files, self.files_remaining),
            message,
        }
    }
}
