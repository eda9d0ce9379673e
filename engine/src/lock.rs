//! OS-level named lock.
//!
//! A `NamedLock` is an exclusive lock identified by a name, visible to every
//! process on the machine. It is a whole-file lock on `<tmp>/<name>.lock`:
//! `flock` on Unix, `LockFileEx` on Windows. The lock file itself stays on
//! disk; only the OS lock matters, and the kernel drops it if the holder dies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use crate::error::EngineError;

/// Held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct NamedLock {
    name: String,
    file: File,
}

impl NamedLock {
    /// Where the lock file for `name` lives.
    pub fn lock_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}.lock"))
    }

    /// Block until the lock is held.
    pub fn acquire(name: &str) -> Result<Self, EngineError> {
        let path = Self::lock_path(name);
        let file = sys::lock(&path, true)
            .map_err(|source| lock_error(name, source))?
            .ok_or_else(|| lock_error(name, io::Error::from(io::ErrorKind::WouldBlock)))?;
        Ok(Self {
            name: name.to_string(),
            file,
        })
    }

    /// Take the lock if it is free. `Ok(None)` means another holder has it.
    pub fn try_acquire(name: &str) -> Result<Option<Self>, EngineError> {
        let path = Self::lock_path(name);
        let file = sys::lock(&path, false).map_err(|source| lock_error(name, source))?;
        Ok(file.map(|file| Self {
            name: name.to_string(),
            file,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        sys::unlock(&self.file);
    }
}

fn lock_error(name: &str, source: io::Error) -> EngineError {
    EngineError::Lock {
        name: name.to_string(),
        source,
    }
}

#[cfg(unix)]
mod sys {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub(super) fn lock(path: &Path, blocking: bool) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let operation = if blocking {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };

        loop {
            // SAFETY: the descriptor belongs to `file`, which is open for the whole call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if rc == 0 {
                return Ok(Some(file));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock if !blocking => return Ok(None),
                _ => return Err(err),
            }
        }
    }

    pub(super) fn unlock(file: &File) {
        // SAFETY: as above; closing the file would release it anyway.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub(super) fn lock(path: &Path, blocking: bool) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let flags = if blocking {
            LOCKFILE_EXCLUSIVE_LOCK
        } else {
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
        };

        // SAFETY: the handle belongs to `file`, which is open for the whole
        // call, and the zeroed OVERLAPPED lives until the call returns.
        let locked = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            LockFileEx(
                file.as_raw_handle() as HANDLE,
                flags,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if locked != 0 {
            return Ok(Some(file));
        }
        let err = io::Error::last_os_error();
        if !blocking && err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            return Ok(None);
        }
        Err(err)
    }

    pub(super) fn unlock(file: &File) {
        // SAFETY: as above; closing the handle would release it anyway.
        unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            UnlockFileEx(
                file.as_raw_handle() as HANDLE,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            );
        }
    }
}
