use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// A guard that holds an exclusive lock on a working copy for one sync run.
/// Lock is released when dropped.
#[derive(Debug)]
pub struct SyncLock {
    _file: File,
    path: PathBuf,
}

impl SyncLock {
    /// Acquire an exclusive lock, blocking until available or `timeout`.
    /// Creates the lock file and parent dirs if needed.
    ///
    /// Returns an error with `ErrorKind::TimedOut` if the lock cannot be
    /// acquired within the specified duration.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        // Poll with exponential backoff
        let start = Instant::now();
        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(500);
        let mut reported = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        _file: file,
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("lock acquisition timed out after {:?}", timeout),
                        ));
                    }
                    if !reported {
                        log::info!(
                            "waiting for another sync to release {}",
                            lock_path.display()
                        );
                        reported = true;
                    }
                    std::thread::sleep(sleep_duration);
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("repo.sitesync.lock");

        let lock = SyncLock::acquire(&path, Duration::from_secs(1)).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn second_lock_is_refused_while_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.sitesync.lock");

        let _held = SyncLock::acquire(&path, Duration::from_secs(1)).unwrap();
        assert!(SyncLock::acquire(&path, Duration::ZERO).is_err());
    }

    #[test]
    fn acquire_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.sitesync.lock");

        let _held = SyncLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = SyncLock::acquire(&path, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo.sitesync.lock");

        {
            let _lock = SyncLock::acquire(&path, Duration::from_secs(1)).unwrap();
        }
        assert!(SyncLock::acquire(&path, Duration::ZERO).is_ok());
    }
}
