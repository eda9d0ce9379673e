//! Job orchestration.
//!
//! `JobEngine` owns the job registry and runs jobs, one worker thread per job
//! when several run together. Every progress snapshot goes to the
//! `StateStore` before the caller's callback sees it. After each run the
//! job's live entry is removed from the store and the registry is persisted,
//! whatever the outcome.
//!
//! Services with a process-wide lifetime (the priority coordinator, the
//! encryption gate, the process detector) are constructed by the caller or by
//! `from_config` and injected; nothing in the engine is a global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::control::lock_unpoisoned;
use crate::coordinator::PriorityCoordinator;
use crate::detect::{ProcessDetector, SystemProcessDetector};
use crate::encryption::EncryptionGate;
use crate::error::{AdmissionError, EngineError};
use crate::job::BackupJob;
use crate::model::{BackupType, JobRecord, JobState};
use crate::progress::{NoProgress, ProgressCallback, ProgressState};
use crate::selection::JobSelection;
use crate::state_store::StateStore;
use crate::storage::{JobRepository, JsonJobRepository};
use crate::strategy::ExecutionContext;

/// Result of one job within a multi-job run.
#[derive(Debug)]
pub struct JobOutcome {
    pub id: u32,
    pub name: String,
    pub result: Result<JobState, EngineError>,
}

/// Registry and executor for backup jobs.
pub struct JobEngine {
    jobs: RwLock<Vec<Arc<BackupJob>>>,
    repository: Box<dyn JobRepository>,
    // Held across snapshot and save so the last write is never stale.
    persist_lock: Mutex<()>,
    state_store: StateStore,
    context: ExecutionContext,
    stop_requested: AtomicBool,
}

impl JobEngine {
    /// Build an engine and load the registry from `repository`.
    pub fn new(
        config: EngineConfig,
        repository: Box<dyn JobRepository>,
        state_store: StateStore,
    ) -> Result<Self, EngineError> {
        let mut records = repository.load()?;
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        if records.len() > config.max_backup_jobs {
            warn!(
                loaded = records.len(),
                max = config.max_backup_jobs,
                "registry holds more jobs than allowed"
            );
        }
        let jobs = records
            .into_iter()
            .map(|record| Arc::new(BackupJob::from_record(record)))
            .collect();

        Ok(Self {
            jobs: RwLock::new(jobs),
            repository,
            persist_lock: Mutex::new(()),
            state_store,
            context: ExecutionContext::new(config),
            stop_requested: AtomicBool::new(false),
        })
    }

    /// Engine wired to the files and services named in `config`.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let repository = Box::new(JsonJobRepository::new(config.jobs_file.clone()));
        let state_store = StateStore::new(config.state_file.clone());
        Ok(Self::new(config, repository, state_store)?
            .with_detector(Arc::new(SystemProcessDetector::new())))
    }

    pub fn with_detector(mut self, detector: Arc<dyn ProcessDetector>) -> Self {
        self.context.detector = detector;
        self
    }

    /// Share a coordinator with other engines in the same process.
    pub fn with_coordinator(mut self, coordinator: Arc<PriorityCoordinator>) -> Self {
        self.context.coordinator = coordinator;
        self
    }

    pub fn with_encryption_gate(mut self, gate: Arc<EncryptionGate>) -> Self {
        self.context.encryption = Some(gate);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.context.config
    }

    pub fn coordinator(&self) -> &Arc<PriorityCoordinator> {
        &self.context.coordinator
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state_store
    }

    // ---------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------

    /// Admit a new job and return its id.
    ///
    /// Refused, with the registry untouched, if any field is blank or the
    /// registry is full.
    pub fn add_job(
        &self,
        name: &str,
        source: &str,
        target: &str,
        backup_type: BackupType,
    ) -> Result<u32, AdmissionError> {
        validate_fields(name, source, target)?;

        let id = {
            let mut jobs = self.write_jobs();
            let max = self.config().max_backup_jobs;
            if jobs.len() >= max {
                return Err(AdmissionError::AtCapacity { max });
            }
            let id = jobs.iter().map(|job| job.id()).max().map_or(1, |max_id| max_id + 1);
            jobs.push(Arc::new(BackupJob::new(
                id,
                name.trim(),
                source.trim(),
                target.trim(),
                backup_type,
            )));
            id
        };

        info!(id, name = name.trim(), %backup_type, "backup job added");
        self.persist();
        Ok(id)
    }

    /// Change a job's definition. Refused while it runs.
    pub fn update_job(
        &self,
        id: u32,
        name: &str,
        source: &str,
        target: &str,
        backup_type: BackupType,
    ) -> Result<(), AdmissionError> {
        validate_fields(name, source, target)?;
        let job = self.find(id).ok_or(AdmissionError::UnknownJob { id })?;
        job.redefine(
            name.trim().to_string(),
            source.trim().into(),
            target.trim().into(),
            backup_type,
        )?;
        info!(id, name = name.trim(), "backup job updated");
        self.persist();
        Ok(())
    }

    /// Remove a job. Refused for unknown ids and for running jobs.
    pub fn delete_job(&self, id: u32) -> Result<(), EngineError> {
        {
            let mut jobs = self.write_jobs();
            let index = jobs
                .iter()
                .position(|job| job.id() == id)
                .ok_or(EngineError::JobNotFound { id })?;
            if jobs[index].state().is_running() {
                return Err(EngineError::JobAlreadyActive {
                    name: jobs[index].name(),
                });
            }
            jobs.remove(index);
        }
        info!(id, "backup job deleted");
        self.persist();
        Ok(())
    }

    /// Snapshot of every job, ordered by id.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.read_jobs().iter().map(|job| job.record()).collect()
    }

    pub fn job(&self, id: u32) -> Option<JobRecord> {
        self.find(id).map(|job| job.record())
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run one job on the calling thread.
    pub fn execute_job(
        &self,
        id: u32,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<JobState, EngineError> {
        let job = self.find(id).ok_or(EngineError::JobNotFound { id })?;
        self.run_job(&job, progress.unwrap_or(&NoProgress))
    }

    /// Run the selected jobs concurrently, one worker each.
    ///
    /// Ids named explicitly must exist; otherwise nothing starts.
    pub fn execute_jobs(
        &self,
        selection: &JobSelection,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<JobOutcome>, EngineError> {
        let selected = {
            let jobs = self.read_jobs();
            if let Some(&missing) = selection
                .required_ids()
                .iter()
                .find(|id| !jobs.iter().any(|job| job.id() == **id))
            {
                return Err(EngineError::JobNotFound { id: missing });
            }
            jobs.iter()
                .filter(|job| selection.contains(job.id()))
                .cloned()
                .collect::<Vec<_>>()
        };
        Ok(self.run_concurrently(selected, progress.unwrap_or(&NoProgress)))
    }

    /// Run every registered job concurrently.
    pub fn execute_all_jobs(&self, progress: Option<&dyn ProgressCallback>) -> Vec<JobOutcome> {
        let all = self.read_jobs().clone();
        self.run_concurrently(all, progress.unwrap_or(&NoProgress))
    }

    fn run_concurrently(
        &self,
        jobs: Vec<Arc<BackupJob>>,
        progress: &dyn ProgressCallback,
    ) -> Vec<JobOutcome> {
        thread::scope(|scope| {
            let workers: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    let spawned = thread::Builder::new()
                        .name(format!("backup-job-{}", job.id()))
                        .spawn_scoped(scope, {
                            let job = Arc::clone(&job);
                            move || self.run_job(&job, progress)
                        });
                    (job, spawned)
                })
                .collect();

            workers
                .into_iter()
                .map(|(job, spawned)| {
                    let result = match spawned {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            job.mark_error();
                            Err(EngineError::WorkerPanicked { name: job.name() })
                        }),
                        Err(source) => Err(EngineError::WorkerSpawn {
                            name: job.name(),
                            source,
                        }),
                    };
                    JobOutcome {
                        id: job.id(),
                        name: job.name(),
                        result,
                    }
                })
                .collect()
        })
    }

    fn run_job(
        &self,
        job: &BackupJob,
        progress: &dyn ProgressCallback,
    ) -> Result<JobState, EngineError> {
        let forward = StoreForwarder::new(&self.state_store, progress);
        let result = job.execute(&self.context, &forward);

        // Clear the entry under the name the run published, which may differ
        // from the current name if the job was redefined before it started.
        if let Some(name) = forward.published_name() {
            if let Err(e) = self.state_store.remove(&name) {
                warn!(job = %name, error = %e, "failed to clear live state");
            }
        }
        self.persist();
        result
    }

    // ---------------------------------------------------------------------
    // Control
    // ---------------------------------------------------------------------

    pub fn pause_job(&self, id: u32) -> Result<(), EngineError> {
        self.control(id, BackupJob::pause)
    }

    pub fn resume_job(&self, id: u32) -> Result<(), EngineError> {
        self.control(id, BackupJob::resume)
    }

    pub fn cancel_job(&self, id: u32) -> Result<(), EngineError> {
        self.control(id, BackupJob::cancel)
    }

    pub fn pause_all(&self) {
        self.read_jobs().iter().for_each(|job| job.pause());
    }

    pub fn resume_all(&self) {
        self.read_jobs().iter().for_each(|job| job.resume());
    }

    pub fn cancel_all(&self) {
        self.read_jobs().iter().for_each(|job| job.cancel());
    }

    /// Ask the front end's loop to end. Running jobs are not touched.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn resume_loop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn should_continue(&self) -> bool {
        !self.stop_requested.load(Ordering::SeqCst)
    }

    fn control(&self, id: u32, action: fn(&BackupJob)) -> Result<(), EngineError> {
        let job = self.find(id).ok_or(EngineError::JobNotFound { id })?;
        action(&job);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn find(&self, id: u32) -> Option<Arc<BackupJob>> {
        self.read_jobs().iter().find(|job| job.id() == id).cloned()
    }

    fn persist(&self) {
        let _guard = lock_unpoisoned(&self.persist_lock);
        let records = self.jobs();
        if let Err(e) = self.repository.save(&records) {
            error!(error = %e, "failed to persist job registry");
        }
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, Vec<Arc<BackupJob>>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, Vec<Arc<BackupJob>>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_fields(name: &str, source: &str, target: &str) -> Result<(), AdmissionError> {
    for (field, value) in [("name", name), ("source", source), ("target", target)] {
        if value.trim().is_empty() {
            return Err(AdmissionError::BlankField { field });
        }
    }
    Ok(())
}

/// Records each snapshot in the store, then hands it to the caller.
struct StoreForwarder<'a> {
    store: &'a StateStore,
    inner: &'a dyn ProgressCallback,
    published: Mutex<Option<String>>,
}

impl<'a> StoreForwarder<'a> {
    fn new(store: &'a StateStore, inner: &'a dyn ProgressCallback) -> Self {
        Self {
            store,
            inner,
            published: Mutex::new(None),
        }
    }

    /// Name of the last snapshot recorded, if any.
    fn published_name(&self) -> Option<String> {
        lock_unpoisoned(&self.published).clone()
    }
}

impl ProgressCallback for StoreForwarder<'_> {
    fn on_progress(&self, state: &ProgressState) {
        *lock_unpoisoned(&self.published) = Some(state.backup_name.clone());
        if let Err(e) = self.store.update(state) {
            warn!(job = %state.backup_name, error = %e, "failed to record live state");
        }
        self.inner.on_progress(state);
    }
}
