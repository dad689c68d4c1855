//! Temp file ownership and cleanup.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::multipart::{MultipartError, Result};

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Attempts at finding an unused temp file name before giving up.
const CREATE_ATTEMPTS: usize = 32;

#[derive(Debug, Default)]
struct Tracker {
    tracked: HashSet<PathBuf>,
    closed: bool,
}

/// Tracks every temp file created by a repository so that none outlives it.
///
/// Files are removed when their owning item is dropped or deleted; whatever
/// is still tracked when [`FileCleaner::shutdown`] runs is removed then.
/// Clones share the same tracker.
#[derive(Debug, Clone, Default)]
pub struct FileCleaner {
    inner: Arc<Mutex<Tracker>>,
}

impl FileCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of temp files currently alive.
    pub fn tracked_count(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.lock().tracked.iter().cloned().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }

    /// Stop accepting new temp files and delete every tracked one.
    ///
    /// Returns the number of files removed. Calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        let paths: Vec<PathBuf> = {
            let mut tracker = self.lock();
            tracker.closed = true;
            tracker.tracked.drain().collect()
        };

        let mut removed = 0;
        for path in &paths {
            if remove_quietly(path) {
                removed += 1;
            }
        }
        if !paths.is_empty() {
            tracing::debug!(removed, "file cleaner shut down");
        }
        removed
    }

    fn track(&self, path: &Path) -> Result<()> {
        let mut tracker = self.lock();
        if tracker.closed {
            return Err(MultipartError::RepositoryClosed);
        }
        tracker.tracked.insert(path.to_path_buf());
        Ok(())
    }

    fn untrack(&self, path: &Path) {
        self.lock().tracked.remove(path);
    }

    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove `path`, treating "already gone" as success.
fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to delete temp file");
            false
        }
    }
}

/// A tracked temp file in the repository directory, deleted on drop.
#[derive(Debug)]
pub(crate) struct TempFile {
    path: PathBuf,
    cleaner: FileCleaner,
    live: bool,
}

impl TempFile {
    /// Create a fresh file named `formsplit-upload-<pid>-<nanos>-<n>.tmp`.
    pub(crate) fn create(dir: &Path, cleaner: &FileCleaner) -> Result<(Self, File)> {
        if cleaner.is_shut_down() {
            return Err(MultipartError::RepositoryClosed);
        }

        let ts_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        for _ in 0..CREATE_ATTEMPTS {
            let counter = TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
            let candidate = dir.join(format!(
                "formsplit-upload-{}-{ts_nanos}-{counter}.tmp",
                std::process::id()
            ));

            match OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&candidate)
            {
                Ok(file) => {
                    if let Err(err) = cleaner.track(&candidate) {
                        drop(file);
                        remove_quietly(&candidate);
                        return Err(err);
                    }
                    tracing::trace!(path = %candidate.display(), "created temp file");
                    return Ok((
                        Self {
                            path: candidate,
                            cleaner: cleaner.clone(),
                            live: true,
                        },
                        file,
                    ));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(MultipartError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "failed to allocate a unique temp file",
        )))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `dest`, renaming when possible and copying otherwise.
    ///
    /// On success the temp file is no longer tracked; on failure it stays.
    pub(crate) fn persist(&mut self, dest: &Path) -> io::Result<()> {
        if std::fs::rename(&self.path, dest).is_err() {
            std::fs::copy(&self.path, dest)?;
            remove_quietly(&self.path);
        }
        self.cleaner.untrack(&self.path);
        self.live = false;
        Ok(())
    }

    /// Delete the file now instead of on drop.
    pub(crate) fn delete(&mut self) {
        if self.live {
            remove_quietly(&self.path);
            self.cleaner.untrack(&self.path);
            self.live = false;
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.delete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = FileCleaner::new();

        let (temp, _file) = TempFile::create(dir.path(), &cleaner).unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("formsplit-upload-")
        );
        assert_eq!(cleaner.tracked_count(), 1);

        drop(temp);
        assert!(!path.exists());
        assert_eq!(cleaner.tracked_count(), 0);
    }

    #[test]
    fn test_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = FileCleaner::new();
        let temps: Vec<_> = (0..5)
            .map(|_| TempFile::create(dir.path(), &cleaner).unwrap().0)
            .collect();
        let paths: HashSet<_> = temps.iter().map(|t| t.path().to_path_buf()).collect();
        assert_eq!(paths.len(), 5);
        assert_eq!(cleaner.tracked_count(), 5);
    }

    #[test]
    fn test_shutdown_removes_tracked_and_refuses_new() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = FileCleaner::new();
        let (first, _) = TempFile::create(dir.path(), &cleaner).unwrap();
        let (second, _) = TempFile::create(dir.path(), &cleaner).unwrap();
        let paths = [first.path().to_path_buf(), second.path().to_path_buf()];

        assert_eq!(cleaner.shutdown(), 2);
        assert!(paths.iter().all(|p| !p.exists()));
        assert!(cleaner.is_shut_down());
        assert!(matches!(
            TempFile::create(dir.path(), &cleaner),
            Err(MultipartError::RepositoryClosed)
        ));

        // Dropping handles after shutdown is harmless.
        drop(first);
        drop(second);
        assert_eq!(cleaner.shutdown(), 0);
    }

    #[test]
    fn test_persist_untracks() {
        let dir = tempfile::tempdir().unwrap();
        let cleaner = FileCleaner::new();
        let (mut temp, mut file) = TempFile::create(dir.path(), &cleaner).unwrap();
        io::Write::write_all(&mut file, b"kept").unwrap();
        drop(file);

        let dest = dir.path().join("kept.bin");
        temp.persist(&dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"kept");
        assert_eq!(cleaner.tracked_count(), 0);
        assert_eq!(cleaner.shutdown(), 0);
        drop(temp);
        assert!(dest.exists());
    }
}
