//! Advisory locks for read-modify-write updates.
//!
//! A lock on `dir/name.json` is an exclusive `fs2` lock on the sidecar file
//! `dir/.name.json.lock`. The sidecar is never removed, so every process
//! always contends on the same inode.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// How long to wait for a contended lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

impl DocumentLock {
    /// Sidecar lock path for a document.
    #[must_use]
    pub fn lock_path(document: &Path) -> PathBuf {
        let name = document
            .file_name()
            .map_or_else(|| "document".into(), |n| n.to_string_lossy().into_owned());
        document.with_file_name(format!(".{name}.lock"))
    }

    /// Whether a filename is a lock sidecar.
    #[must_use]
    pub fn is_lock_file(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(".lock")
    }

    /// Acquires the lock for `document`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the sidecar cannot be opened or
    /// the lock stays contended past `timeout`.
    pub fn acquire(document: &Path, timeout: Duration) -> Result<Self> {
        let path = Self::lock_path(document);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::operation("create_lock_dir", e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::operation("open_lock_file", format!("{}: {e}", path.display())))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if started.elapsed() >= timeout => {
                    return Err(Error::operation(
                        "acquire_lock",
                        format!("{} still locked after {timeout:?}: {e}", path.display()),
                    ));
                },
                Err(_) => thread::sleep(RETRY_INTERVAL),
            }
        }

        tracing::trace!(lock = %path.display(), "Acquired document lock");
        Ok(Self { file, path })
    }

    /// Path of the sidecar file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(lock = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}
