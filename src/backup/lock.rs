use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::ExecutionError;

/// Sentinel file that serializes backups of one database into one
/// directory. Removed when dropped.
#[derive(Debug)]
pub struct DatabaseLock {
    path: PathBuf,
}

impl DatabaseLock {
    pub fn lock_path(dir: &Path, database: &str) -> PathBuf {
        dir.join(format!(".{}.lock", database))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fails immediately if the lock is held. A lock left behind by a crashed
    /// process has to be removed by hand; it holds the owner's pid.
    pub fn acquire(dir: &Path, database: &str) -> Result<Self, ExecutionError> {
        let path = Self::lock_path(dir, database);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Best effort; the lock is the file's existence.
                let _ = writeln!(file, "{}", std::process::id());
                debug!(lock = %path.display(), "Acquired backup lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ExecutionError::Locked {
                database: database.to_string(),
                holder: read_holder(&path),
                lock: path,
            }),
            Err(e) => Err(ExecutionError::Io(format!(
                "failed to create lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Pid written by the process that owns `path`, if it can be read.
fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
