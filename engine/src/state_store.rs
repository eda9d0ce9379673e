//! Live progress snapshot shared with monitor processes.
//!
//! The store keeps the latest `ProgressState` of every job currently running
//! and rewrites the whole snapshot file on each change. Writes are serialized
//! so the file always holds one consistent set of entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::control::lock_unpoisoned;
use crate::error::EngineError;
use crate::progress::ProgressState;
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Default)]
pub struct StateStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, ProgressState>>,
}

impl StateStore {
    /// Store backed by a snapshot file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store without a file; snapshots are only visible in-process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Upsert the entry for `state.backup_name` and rewrite the snapshot.
    pub fn update(&self, state: &ProgressState) -> Result<(), EngineError> {
        let mut entries = lock_unpoisoned(&self.entries);
        entries.insert(state.backup_name.clone(), state.clone());
        self.write(&entries)
    }

    /// Drop the entry for `name` and rewrite the snapshot.
    pub fn remove(&self, name: &str) -> Result<(), EngineError> {
        let mut entries = lock_unpoisoned(&self.entries);
        entries.remove(name);
        self.write(&entries)
    }

    pub fn get(&self, name: &str) -> Option<ProgressState> {
        lock_unpoisoned(&self.entries).get(name).cloned()
    }

    /// Current entries, ordered by job name.
    pub fn snapshot(&self) -> Vec<ProgressState> {
        lock_unpoisoned(&self.entries).values().cloned().collect()
    }

    /// Read a snapshot file written by another process.
    /// A missing file means nothing is running.
    pub fn read_snapshot(path: &Path) -> Result<Vec<ProgressState>, EngineError> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    // Called with the entries lock held, which is what serializes writers.
    fn write(&self, entries: &BTreeMap<String, ProgressState>) -> Result<(), EngineError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let states: Vec<&ProgressState> = entries.values().collect();
        write_json_atomic(path, &states)
    }
}
