//! Per-project advisory locking (C2): one deployment-affecting operation at
//! a time. Grounded on the fs2::FileExt exclusive-lock-plus-pidfile pattern
//! used for the daemon's single-instance guard in the pack's oddjobs
//! example, adapted from a single global lock to one lock file per project.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use crate::error::OtterError;

/// A lock is considered abandoned (holder process gone, or stuck beyond
/// this long) and is reclaimed rather than reported as held.
const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

pub struct ProjectLock {
    project: String,
    file: File,
    pid_path: PathBuf,
}

impl ProjectLock {
    /// Attempts to acquire the lock for `project`. On contention, checks
    /// whether the recorded holder pid is still alive (`kill(pid, 0)`) and
    /// whether the lock predates the staleness threshold; if both say the
    /// holder is gone, breaks the lock and retries exactly once.
    pub fn acquire(
        lock_path: PathBuf,
        pid_path: PathBuf,
        project: &str,
    ) -> Result<Self, OtterError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                Self::write_pid(&pid_path)?;
                Ok(Self {
                    project: project.to_string(),
                    file,
                    pid_path,
                })
            }
            Err(_) => {
                if Self::holder_is_gone(&pid_path) {
                    // The previous holder vanished without releasing the
                    // advisory lock (killed process, crashed host). Break
                    // it by reopening and retrying once.
                    drop(file);
                    let file = OpenOptions::new()
                        .create(true)
                        .write(true)
                        .open(&lock_path)?;
                    file.try_lock_exclusive().map_err(|_| {
                        OtterError::ProjectLocked {
                            project: project.to_string(),
                            holder_pid: Self::read_pid(&pid_path).unwrap_or(0),
                        }
                    })?;
                    Self::write_pid(&pid_path)?;
                    return Ok(Self {
                        project: project.to_string(),
                        file,
                        pid_path,
                    });
                }
                Err(OtterError::ProjectLocked {
                    project: project.to_string(),
                    holder_pid: Self::read_pid(&pid_path).unwrap_or(0),
                })
            }
        }
    }

    fn write_pid(pid_path: &PathBuf) -> Result<(), OtterError> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(pid_path)?;
        write!(f, "{}\n{}", std::process::id(), unix_epoch_secs())?;
        Ok(())
    }

    fn read_pid(pid_path: &PathBuf) -> Option<i32> {
        let mut s = String::new();
        File::open(pid_path).ok()?.read_to_string(&mut s).ok()?;
        s.lines().next()?.trim().parse().ok()
    }

    fn read_recorded_at(pid_path: &PathBuf) -> Option<SystemTime> {
        let mut s = String::new();
        File::open(pid_path).ok()?.read_to_string(&mut s).ok()?;
        let secs: u64 = s.lines().nth(1)?.trim().parse().ok()?;
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// True when the recorded pid is confirmed dead. A live pid always
    /// holds the lock, no matter how long it's been running — a raised
    /// `--timeout` or a slow host must never have its lock stolen out from
    /// under it. Only when the pid file itself can't be read does age come
    /// into play, since there's no pid to check liveness against: a fresh,
    /// unreadable pid file still means someone is mid-write, while one
    /// older than [`STALE_AFTER`] is reclaimed.
    fn holder_is_gone(pid_path: &PathBuf) -> bool {
        match Self::read_pid(pid_path) {
            Some(pid) => !process_alive(pid),
            None => match Self::read_recorded_at(pid_path) {
                Some(at) => SystemTime::now()
                    .duration_since(at)
                    .map(|d| d > STALE_AFTER)
                    .unwrap_or(false),
                None => false,
            },
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.pid_path);
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;
    // A null signal performs no action but still reports ESRCH when the
    // process doesn't exist and EPERM when it exists but we lack
    // permission — both distinguishable from "alive and ours".
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

fn unix_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("demo.lock");
        let pid_path = dir.path().join("demo.pid");

        {
            let _lock =
                ProjectLock::acquire(lock_path.clone(), pid_path.clone(), "demo").unwrap();
        }

        let _lock2 = ProjectLock::acquire(lock_path, pid_path, "demo").unwrap();
    }

    #[test]
    fn contended_lock_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("demo.lock");
        let pid_path = dir.path().join("demo.pid");

        let _held = ProjectLock::acquire(lock_path.clone(), pid_path.clone(), "demo").unwrap();
        // Overwrite the pid file with our own pid so the holder looks alive
        // and fresh, forcing a genuine contention error rather than a
        // stale-lock reclaim.
        ProjectLock::write_pid(&pid_path).unwrap();

        let err = ProjectLock::acquire(lock_path, pid_path, "demo").unwrap_err();
        assert!(matches!(err, OtterError::ProjectLocked { .. }));
    }
}
