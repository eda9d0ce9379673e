//! Backup job entity and its run lifecycle.
//!
//! A `BackupJob` is shared between the registry and the worker running it,
//! so its mutable parts (definition, state, run controls) live behind one
//! mutex. The state machine is:
//!
//! ```text
//! Inactive ──▶ Active ──▶ Completed
//!    ▲           │  ▲
//!    │           ▼  │
//!    │         Paused (transient, only while a run is in progress)
//!    │           │
//!    └───────────┴──▶ Error
//! ```
//!
//! Completed and Error jobs can be executed again; each run starts with fresh
//! controls.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::control::{lock_unpoisoned, CancellationToken, PauseGate};
use crate::error::{AdmissionError, EngineError};
use crate::model::{BackupType, JobRecord, JobState};
use crate::progress::ProgressCallback;
use crate::strategy::{BackupStrategy, ExecutionContext, JobRun, RunOutcome};

#[derive(Debug)]
struct JobInner {
    record: JobRecord,
    cancel: CancellationToken,
    pause: PauseGate,
}

impl JobInner {
    fn reset_controls(&mut self) {
        self.cancel = CancellationToken::new();
        self.pause = PauseGate::new();
    }
}

/// A configured source-to-target backup task.
#[derive(Debug)]
pub struct BackupJob {
    id: u32,
    inner: Mutex<JobInner>,
}

impl BackupJob {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> Self {
        Self::from_record(JobRecord {
            id,
            name: name.into(),
            source_directory: source.into(),
            target_directory: target.into(),
            backup_type,
            last_execution: None,
            state: JobState::Inactive,
        })
    }

    /// Rebuild a job from its persisted record.
    ///
    /// A record saved mid-run belongs to a process that no longer exists, so
    /// it comes back as Error.
    pub fn from_record(mut record: JobRecord) -> Self {
        if record.state.is_running() {
            record.state = JobState::Error;
        }
        Self {
            id: record.id,
            inner: Mutex::new(JobInner {
                record,
                cancel: CancellationToken::new(),
                pause: PauseGate::new(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Snapshot of the persisted view.
    pub fn record(&self) -> JobRecord {
        lock_unpoisoned(&self.inner).record.clone()
    }

    pub fn name(&self) -> String {
        lock_unpoisoned(&self.inner).record.name.clone()
    }

    pub fn state(&self) -> JobState {
        lock_unpoisoned(&self.inner).record.state
    }

    pub(crate) fn set_state(&self, state: JobState) {
        lock_unpoisoned(&self.inner).record.state = state;
    }

    /// Replace the job definition. Refused while a run is in progress.
    pub(crate) fn redefine(
        &self,
        name: String,
        source: PathBuf,
        target: PathBuf,
        backup_type: BackupType,
    ) -> Result<(), AdmissionError> {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.record.state.is_running() {
            return Err(AdmissionError::JobActive { id: self.id });
        }
        inner.record.name = name;
        inner.record.source_directory = source;
        inner.record.target_directory = target;
        inner.record.backup_type = backup_type;
        Ok(())
    }

    /// Install a fresh cancellation token and open the pause gate.
    ///
    /// The previous token is left as it was, so a worker still holding it
    /// keeps observing its own cancellation.
    pub fn reset_controls(&self) {
        lock_unpoisoned(&self.inner).reset_controls();
    }

    pub fn cancel(&self) {
        lock_unpoisoned(&self.inner).cancel.cancel();
    }

    pub fn pause(&self) {
        lock_unpoisoned(&self.inner).pause.pause();
    }

    pub fn resume(&self) {
        lock_unpoisoned(&self.inner).pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        lock_unpoisoned(&self.inner).pause.is_paused()
    }

    pub fn mark_error(&self) {
        self.set_state(JobState::Error);
    }

    /// Claim the job for a run: check it is idle, reset its controls and
    /// mark it Active, all under one lock.
    fn begin(&self) -> Result<(JobRecord, CancellationToken, PauseGate), EngineError> {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.record.state.is_running() {
            return Err(EngineError::JobAlreadyActive {
                name: inner.record.name.clone(),
            });
        }
        inner.reset_controls();
        inner.record.state = JobState::Active;
        Ok((inner.record.clone(), inner.cancel.clone(), inner.pause.clone()))
    }

    /// Run the job to a terminal state.
    ///
    /// Returns the terminal state: Completed, or Error if the run was
    /// cancelled. A failure of the run itself marks the job Error and is
    /// returned to the caller.
    pub fn execute(
        &self,
        ctx: &ExecutionContext,
        progress: &dyn ProgressCallback,
    ) -> Result<JobState, EngineError> {
        let (record, cancel, pause) = self.begin()?;

        let span = info_span!("backup_job", job = %record.name, run_id = %Uuid::new_v4());
        let _entered = span.enter();
        info!(
            source_dir = %record.source_directory.display(),
            target_dir = %record.target_directory.display(),
            backup_type = %record.backup_type,
            "backup job started"
        );

        let run = JobRun {
            job: self,
            name: &record.name,
            source: &record.source_directory,
            target: &record.target_directory,
            cancel: &cancel,
            pause: &pause,
        };
        let result = BackupStrategy::for_type(record.backup_type)
            .and_then(|strategy| strategy.run(&run, ctx, progress));

        match result {
            Ok(RunOutcome::Completed) => {
                let mut inner = lock_unpoisoned(&self.inner);
                inner.record.state = JobState::Completed;
                inner.record.last_execution = Some(Local::now());
                info!("backup job completed");
                Ok(JobState::Completed)
            }
            Ok(RunOutcome::Cancelled) => {
                self.mark_error();
                warn!("backup job ended by cancellation");
                Ok(JobState::Error)
            }
            Err(e) => {
                self.mark_error();
                error!(error = %e, "backup job failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::progress::{NoProgress, ProgressState};
    use std::fs;

    fn context() -> ExecutionContext {
        ExecutionContext::new(EngineConfig::default())
    }

    #[test]
    fn test_new_job_is_inactive() {
        let job = BackupJob::new(1, "docs", "/src", "/dst", BackupType::Complete);
        assert_eq!(job.id(), 1);
        assert_eq!(job.state(), JobState::Inactive);
        assert!(job.record().last_execution.is_none());
    }

    #[test]
    fn test_from_record_turns_interrupted_run_into_error() {
        let mut record = BackupJob::new(2, "a", "/s", "/t", BackupType::Complete).record();
        record.state = JobState::Paused;
        let job = BackupJob::from_record(record);
        assert_eq!(job.state(), JobState::Error);
    }

    #[test]
    fn test_execute_completes_and_stamps_time() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("file1.txt"), b"hello").unwrap();
        let dst = temp_dir.path().join("dst");

        let job = BackupJob::new(1, "docs", &src, &dst, BackupType::Complete);
        let state = job.execute(&context(), &NoProgress).expect("Failed to run job");

        assert_eq!(state, JobState::Completed);
        assert_eq!(job.state(), JobState::Completed);
        assert!(job.record().last_execution.is_some());
        assert_eq!(fs::read_to_string(dst.join("file1.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_missing_source_marks_error_and_propagates() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let job = BackupJob::new(
            1,
            "docs",
            temp_dir.path().join("missing"),
            temp_dir.path().join("dst"),
            BackupType::Complete,
        );

        let result = job.execute(&context(), &NoProgress);
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
        assert_eq!(job.state(), JobState::Error);
        assert!(job.record().last_execution.is_none());
    }

    #[test]
    fn test_incremental_fails_fast() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let job = BackupJob::new(
            1,
            "inc",
            temp_dir.path(),
            temp_dir.path().join("dst"),
            BackupType::Incremental,
        );

        let result = job.execute(&context(), &NoProgress);
        assert!(matches!(result, Err(EngineError::NotImplemented { .. })));
        assert_eq!(job.state(), JobState::Error);
        assert!(!temp_dir.path().join("dst").exists(), "nothing may be touched");
    }

    #[test]
    fn test_execute_refuses_running_job() {
        let job = BackupJob::new(1, "docs", "/s", "/t", BackupType::Complete);
        job.set_state(JobState::Active);
        let result = job.execute(&context(), &NoProgress);
        assert!(matches!(result, Err(EngineError::JobAlreadyActive { .. })));
        assert_eq!(job.state(), JobState::Active);
    }

    #[test]
    fn test_rerun_after_error_resets_controls() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        let job = BackupJob::new(1, "docs", &src, temp_dir.path().join("dst"), BackupType::Complete);

        // A cancel and pause issued before the run belong to stale controls
        job.set_state(JobState::Error);
        job.cancel();
        job.pause();

        let state = job.execute(&context(), &NoProgress).expect("Failed to run job");
        assert_eq!(state, JobState::Completed);
        assert!(!job.is_paused());
    }

    #[test]
    fn test_reset_controls_leaves_old_token_cancelled() {
        let job = BackupJob::new(1, "docs", "/s", "/t", BackupType::Complete);
        let old = lock_unpoisoned(&job.inner).cancel.clone();
        job.cancel();
        job.pause();
        job.reset_controls();

        assert!(old.is_cancelled());
        assert!(!lock_unpoisoned(&job.inner).cancel.is_cancelled());
        assert!(!job.is_paused());
    }

    #[test]
    fn test_redefine_refused_while_active() {
        let job = BackupJob::new(7, "docs", "/s", "/t", BackupType::Complete);
        job.set_state(JobState::Active);
        let result = job.redefine("x".into(), "/a".into(), "/b".into(), BackupType::Differential);
        assert_eq!(result, Err(AdmissionError::JobActive { id: 7 }));

        job.set_state(JobState::Completed);
        job.redefine("x".into(), "/a".into(), "/b".into(), BackupType::Differential)
            .expect("Failed to redefine");
        let record = job.record();
        assert_eq!(record.name, "x");
        assert_eq!(record.backup_type, BackupType::Differential);
    }

    #[test]
    fn test_progress_ends_with_completed_snapshot() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), b"abc").unwrap();
        fs::write(src.join("b.txt"), b"de").unwrap();

        let seen = Mutex::new(Vec::<ProgressState>::new());
        let callback = |state: &ProgressState| seen.lock().unwrap().push(state.clone());
        let job = BackupJob::new(1, "docs", &src, temp_dir.path().join("dst"), BackupType::Complete);
        job.execute(&context(), &callback).expect("Failed to run job");

        let seen = seen.into_inner().unwrap();
        // initial + one per file + final
        assert_eq!(seen.len(), 4);
        let last = seen.last().unwrap();
        assert_eq!(last.state, JobState::Completed);
        assert_eq!(last.files_remaining, 0);
        assert_eq!(last.size_remaining, 0);
        assert_eq!(last.total_size, 5);
        assert_eq!(last.progress_percentage, 100.0);
    }
}
