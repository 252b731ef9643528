//! Run Lock
//!
//! File-based mutual exclusion between controller invocations. A lock
//! older than the staleness threshold is treated as abandoned and
//! reclaimed. The guard deletes the lock on drop, so every exit path
//! releases it.

use chrono::{DateTime, Duration, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::RunLockError;
use crate::state::RunLockRecord;
use crate::store::write_atomic;

#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    stale_after: Duration,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for this process
    pub fn acquire(&self, now: DateTime<Utc>) -> Result<RunLockGuard, RunLockError> {
        self.acquire_as(std::process::id(), now)
    }

    pub fn acquire_as(&self, holder_pid: u32, now: DateTime<Utc>) -> Result<RunLockGuard, RunLockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let record = RunLockRecord {
            holder_pid,
            acquired_at: Some(now),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| RunLockError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(&body)?;
                file.sync_all()?;
                debug!("Run lock acquired: {}", self.path.display());
                return Ok(RunLockGuard::new(self.path.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let age = self.age(now);
        match age {
            Some(age) if age < self.stale_after => {
                return Err(RunLockError::Busy {
                    age_secs: age.num_seconds(),
                });
            }
            Some(age) => warn!("Reclaiming stale run lock (age {}s)", age.num_seconds()),
            None => warn!("Reclaiming unreadable run lock at {}", self.path.display()),
        }

        write_atomic(&self.path, &body)?;
        info!("Run lock reclaimed by pid {}", holder_pid);
        Ok(RunLockGuard::new(self.path.clone()))
    }

    /// Current lock holder, if any
    pub fn peek(&self) -> Option<RunLockRecord> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Age from the recorded timestamp, falling back to file mtime
    fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        if let Some(at) = self.peek().and_then(|r| r.acquired_at) {
            return Some(now - at);
        }
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        let modified: DateTime<Utc> = modified.into();
        Some(now - modified)
    }
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    released: bool,
}

impl RunLockGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, released: false }
    }

    pub fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        remove_lock(&self.path)
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_lock(&self.path) {
                warn!("Failed to release run lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn remove_lock(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Run lock released: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    fn lock(dir: &Path) -> RunLock {
        RunLock::new(dir.join("state").join("run.lock"), Duration::seconds(3600))
    }

    #[test]
    fn test_second_acquire_while_fresh_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path());
        let _guard = lock.acquire_as(1, now()).unwrap();
        for secs in [0, 1, 1800, 3599] {
            match lock.acquire_as(2, now() + Duration::seconds(secs)) {
                Err(RunLockError::Busy { age_secs }) => assert_eq!(age_secs, secs),
                other => panic!("expected busy, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_stale_lock_is_reclaimed_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path());
        let first = lock.acquire_as(1, now()).unwrap();
        std::mem::forget(first);

        let later = now() + Duration::seconds(3600);
        let _guard = lock.acquire_as(2, later).unwrap();
        let record = lock.peek().unwrap();
        assert_eq!(record.holder_pid, 2);
        assert_eq!(record.acquired_at, Some(later));
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path());
        {
            let _guard = lock.acquire_as(1, now()).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
        assert!(lock.acquire_as(2, now()).is_ok());
    }

    #[test]
    fn test_release_on_error_path() {
        fn failing_cycle(lock: &RunLock) -> Result<(), String> {
            let _guard = lock.acquire_as(7, now()).map_err(|e| e.to_string())?;
            Err("venue exploded".to_string())
        }
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path());
        assert!(failing_cycle(&lock).is_err());
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_unreadable_lock_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock(dir.path());
        fs::create_dir_all(lock.path().parent().unwrap()).unwrap();
        fs::write(lock.path(), "12345\n1700000000").unwrap();
        // legacy text lock with a current mtime
        match lock.acquire_as(2, Utc::now()) {
            Err(RunLockError::Busy { .. }) => {}
            other => panic!("expected busy, got {:?}", other),
        }
    }
}
