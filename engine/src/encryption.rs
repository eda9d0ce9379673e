//! Serialized access to the external encryption tool.
//!
//! The tool refuses to run twice at once, so every invocation goes through an
//! `EncryptionGate`: an in-process mutex for the engine's own workers, plus a
//! `NamedLock` so a second engine process queues instead of colliding.
//!
//! Tool contract: `tool <absolute-target-path> <key>`. The exit code is the
//! encryption time in milliseconds; negative codes are failures.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;

use tracing::debug;

use crate::control::lock_unpoisoned;
use crate::error::EngineError;
use crate::lock::NamedLock;

/// Lock shared by every engine process on the machine.
pub const GATE_LOCK_NAME: &str = "backup-engine-encryption";

/// Lock the tool takes for itself. Must differ from `GATE_LOCK_NAME`, since
/// the gate is still held while the tool runs.
pub const TOOL_INSTANCE_LOCK_NAME: &str = "cryptosoft-instance";

/// The tool failed (bad arguments, unreadable file, ...).
pub const EXIT_FAILED: i64 = -1;

/// Another instance of the tool already held its lock.
pub const EXIT_ALREADY_RUNNING: i64 = -2;

/// Mutual-exclusion wrapper around the encryption tool.
#[derive(Debug)]
pub struct EncryptionGate {
    tool: PathBuf,
    lock_name: String,
    in_process: Mutex<()>,
}

impl EncryptionGate {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self::with_lock_name(tool, GATE_LOCK_NAME)
    }

    /// Gate using a custom system-wide lock name.
    pub fn with_lock_name(tool: impl Into<PathBuf>, lock_name: &str) -> Self {
        Self {
            tool: tool.into(),
            lock_name: lock_name.to_string(),
            in_process: Mutex::new(()),
        }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Run the tool on `target` and return its duration signal.
    ///
    /// Blocks until both locks are free. Both are released on return,
    /// including when the tool cannot be started.
    pub fn encrypt(&self, target: &Path, key: &str) -> Result<i64, EngineError> {
        let _local = lock_unpoisoned(&self.in_process);
        let _system = NamedLock::acquire(&self.lock_name)?;

        let target = target.canonicalize().unwrap_or_else(|_| target.to_path_buf());
        debug!(tool = %self.tool.display(), target_path = %target.display(), "invoking encryption tool");

        let status = Command::new(&self.tool)
            .arg(&target)
            .arg(key)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|e| EngineError::Encryption {
                tool: self.tool.clone(),
                source: e,
            })?;

        Ok(decode_exit_status(status))
    }
}

/// Turn a tool exit status into a duration signal.
///
/// Unix truncates exit codes to 0..=255, so a tool exiting with `-2` shows up
/// as 254; the upper half is mapped back to negative values. A process
/// killed by a signal reports `EXIT_FAILED`.
pub fn decode_exit_status(status: ExitStatus) -> i64 {
    decode_exit_code(status.code())
}

fn decode_exit_code(code: Option<i32>) -> i64 {
    match code {
        Some(code) if cfg!(unix) && code > 127 => i64::from(code) - 256,
        Some(code) => i64::from(code),
        None => EXIT_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_exit_code() {
        assert_eq!(decode_exit_code(Some(0)), 0);
        assert_eq!(decode_exit_code(Some(42)), 42);
        assert_eq!(decode_exit_code(None), EXIT_FAILED);
        if cfg!(unix) {
            assert_eq!(decode_exit_code(Some(255)), EXIT_FAILED);
            assert_eq!(decode_exit_code(Some(254)), EXIT_ALREADY_RUNNING);
        }
    }

    #[test]
    fn test_missing_tool_is_error_and_releases_locks() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = dir.path().join("file.pdf");
        std::fs::write(&target, b"secret").unwrap();

        let lock_name = format!("gate-test-{}", uuid::Uuid::new_v4());
        let gate = EncryptionGate::with_lock_name(dir.path().join("no-such-tool"), &lock_name);

        assert!(matches!(
            gate.encrypt(&target, "key"),
            Err(EngineError::Encryption { .. })
        ));
        // Both locks were released: a second call fails the same way instead of hanging
        assert!(gate.encrypt(&target, "key").is_err());
        assert!(NamedLock::try_acquire(&lock_name).unwrap().is_some());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;
        use std::thread;

        /// Shell stand-in for the tool that logs when it starts and stops.
        fn write_tool(dir: &Path, log: &Path, exit_code: i32) -> PathBuf {
            let tool = dir.join("fake-tool.sh");
            let script = format!(
                "#!/bin/sh\necho \"start $1\" >> \"{log}\"\nsleep 0.1\necho \"end $1\" >> \"{log}\"\nexit {exit_code}\n",
                log = log.display(),
            );
            fs::write(&tool, script).unwrap();
            fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
            tool
        }

        fn assert_no_overlap(log: &Path, expected_runs: usize) {
            let content = fs::read_to_string(log).unwrap();
            let kinds: Vec<&str> = content
                .lines()
                .map(|l| l.split_whitespace().next().unwrap_or(""))
                .collect();
            assert_eq!(kinds.len(), expected_runs * 2, "log: {content}");
            for pair in kinds.chunks(2) {
                assert_eq!(pair, ["start", "end"], "overlapping runs in log: {content}");
            }
        }

        #[test]
        fn test_returns_exit_code_as_duration() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let tool = write_tool(dir.path(), &log, 7);
            let target = dir.path().join("a.pdf");
            fs::write(&target, b"x").unwrap();

            let gate = EncryptionGate::with_lock_name(tool, &format!("gate-test-{}", uuid::Uuid::new_v4()));
            assert_eq!(gate.encrypt(&target, "key").unwrap(), 7);
        }

        #[test]
        fn test_concurrent_calls_never_overlap() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let tool = write_tool(dir.path(), &log, 3);
            let gate = Arc::new(EncryptionGate::with_lock_name(
                tool,
                &format!("gate-test-{}", uuid::Uuid::new_v4()),
            ));

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let gate = Arc::clone(&gate);
                    let target = dir.path().join(format!("f{i}.pdf"));
                    fs::write(&target, b"x").unwrap();
                    thread::spawn(move || gate.encrypt(&target, "key").unwrap())
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), 3);
            }

            assert_no_overlap(&log, 4);
        }

        #[test]
        fn test_separate_gates_share_the_system_lock() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let tool = write_tool(dir.path(), &log, 0);
            let lock_name = format!("gate-test-{}", uuid::Uuid::new_v4());

            let handles: Vec<_> = (0..3)
                .map(|i| {
                    let gate = EncryptionGate::with_lock_name(tool.clone(), &lock_name);
                    let target = dir.path().join(format!("g{i}.pdf"));
                    fs::write(&target, b"x").unwrap();
                    thread::spawn(move || gate.encrypt(&target, "key").unwrap())
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_no_overlap(&log, 3);
        }
    }
}
