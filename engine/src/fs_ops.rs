//! Filesystem operations module.
//!
//! Low-level operations used by the backup strategies:
//! - Enumerating every file under a source tree
//! - Copying a file while keeping its modification time
//! - Creating target directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

use crate::error::EngineError;

/// A regular file found under a job's source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Full source path
    pub path: PathBuf,
    /// Path relative to the source root; the same relative path is used
    /// under the target root
    pub relative: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl SourceFile {
    pub fn target_in(&self, target_root: &Path) -> PathBuf {
        target_root.join(&self.relative)
    }
}

/// Enumerate all regular files under `source`, recursively.
///
/// Results are sorted by relative path. An unreadable subdirectory is logged
/// and skipped; only a failure at the root is an error.
pub fn enumerate_files(source: &Path) -> Result<Vec<SourceFile>, EngineError> {
    fn recurse(dir: &Path, rel: &Path, files: &mut Vec<SourceFile>) -> Result<(), EngineError> {
        let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| EngineError::EnumerationFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let metadata = entry.metadata().map_err(|e| EngineError::EnumerationFailed {
                path: entry.path(),
                source: e,
            })?;

            let rel_path = rel.join(entry.file_name());
            let entry_path = entry.path();

            if metadata.is_dir() {
                if let Err(e) = recurse(&entry_path, &rel_path, files) {
                    warn!(path = %entry_path.display(), error = %e, "skipping unreadable directory");
                }
            } else if metadata.is_file() {
                files.push(SourceFile {
                    path: entry_path,
                    relative: rel_path,
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                });
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    recurse(source, Path::new(""), &mut files)?;
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Copy `src` over `dst`, keeping the source modification time.
///
/// Returns the number of bytes copied.
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = src_file
        .metadata()
        .map_err(|e| EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        })?
        .modified()
        .ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)).map_err(
            |e| EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            },
        )?;
    }

    Ok(bytes_copied)
}

/// Create `dir` and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => ensure_dir(parent),
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}
