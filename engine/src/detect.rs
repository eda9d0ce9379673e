//! Business-software detection.
//!
//! Jobs pause while a configured process is running. The check sits behind
//! `ProcessDetector` so the engine can be driven without a real process
//! table.

use std::ffi::OsStr;
use std::sync::Mutex;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use crate::control::lock_unpoisoned;

/// Answers whether a named process is currently running.
pub trait ProcessDetector: Send + Sync {
    fn is_running(&self, process_name: &str) -> bool;
}

/// Detector backed by the OS process table.
pub struct SystemProcessDetector {
    system: Mutex<System>,
}

impl SystemProcessDetector {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProcessDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDetector for SystemProcessDetector {
    fn is_running(&self, process_name: &str) -> bool {
        let wanted = normalize(process_name);
        if wanted.is_empty() {
            return false;
        }

        let mut system = lock_unpoisoned(&self.system);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
        let found = system
            .processes()
            .values()
            .any(|process| matches_name(process.name(), &wanted));
        found
    }
}

/// Detector that never reports anything running.
pub struct NoDetector;

impl ProcessDetector for NoDetector {
    fn is_running(&self, _process_name: &str) -> bool {
        false
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

fn matches_name(candidate: &OsStr, wanted: &str) -> bool {
    normalize(&candidate.to_string_lossy()) == wanted
}
