//! Job registry persistence.
//!
//! The engine saves its registry through `JobRepository` after every change
//! and every run. Only `JobRecord`s are stored; controls and strategies are
//! rebuilt at load time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::control::lock_unpoisoned;
use crate::error::EngineError;
use crate::model::JobRecord;

/// Load/save boundary for the job registry.
pub trait JobRepository: Send + Sync {
    fn load(&self) -> Result<Vec<JobRecord>, EngineError>;
    fn save(&self, jobs: &[JobRecord]) -> Result<(), EngineError>;
}

/// Registry stored as a pretty-printed JSON array.
#[derive(Debug)]
pub struct JsonJobRepository {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonJobRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobRepository for JsonJobRepository {
    /// A missing file is an empty registry.
    fn load(&self) -> Result<Vec<JobRecord>, EngineError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, jobs: &[JobRecord]) -> Result<(), EngineError> {
        let _guard = lock_unpoisoned(&self.write);
        write_json_atomic(&self.path, &jobs)
    }
}

/// Registry kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<Vec<JobRecord>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<JobRecord>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
        }
    }

    /// What the last `save` stored.
    pub fn saved(&self) -> Vec<JobRecord> {
        lock_unpoisoned(&self.jobs).clone()
    }
}

impl JobRepository for MemoryJobRepository {
    fn load(&self) -> Result<Vec<JobRecord>, EngineError> {
        Ok(self.saved())
    }

    fn save(&self, jobs: &[JobRecord]) -> Result<(), EngineError> {
        *lock_unpoisoned(&self.jobs) = jobs.to_vec();
        Ok(())
    }
}

/// Read a JSON document; `Ok(None)` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EngineError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::Persistence {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| EngineError::Serialization {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write `value` as JSON next to `path`, then rename over it, so readers
/// never see a half-written file.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| EngineError::Serialization {
        path: path.to_path_buf(),
        source: e,
    })?;

    let persistence = |source: io::Error| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(persistence)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, json).map_err(persistence)?;
    fs::rename(&tmp, path).map_err(persistence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupType, JobState};

    fn record(id: u32) -> JobRecord {
        JobRecord {
            id,
            name: format!("job{id}"),
            source_directory: PathBuf::from("/src"),
            target_directory: PathBuf::from("/dst"),
            backup_type: BackupType::Differential,
            last_execution: None,
            state: JobState::Completed,
        }
    }

    #[test]
    fn test_json_repository_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let repo = JsonJobRepository::new(dir.path().join("jobs.json"));
        assert!(repo.load().expect("Failed to load").is_empty());
    }

    #[test]
    fn test_json_repository_saves_and_loads() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let repo = JsonJobRepository::new(dir.path().join("nested").join("jobs.json"));

        repo.save(&[record(1), record(4)]).expect("Failed to save");
        let loaded = repo.load().expect("Failed to load");

        assert_eq!(loaded, vec![record(1), record(4)]);
        assert!(!dir.path().join("nested").join("jobs.json.tmp").exists());
    }

    #[test]
    fn test_json_repository_rejects_garbage() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("jobs.json");
        fs::write(&path, "{ not json").unwrap();

        let result = JsonJobRepository::new(&path).load();
        assert!(matches!(result, Err(EngineError::Serialization { .. })));
    }

    #[test]
    fn test_memory_repository_round_trip() {
        let repo = MemoryJobRepository::with_jobs(vec![record(2)]);
        assert_eq!(repo.load().unwrap(), vec![record(2)]);
        repo.save(&[]).unwrap();
        assert!(repo.saved().is_empty());
    }
}
