//! Advisory per-channel+box-pair lock file (spec §4.2, §5).
//!
//! An exclusive lock is acquired by creating `<state>.lock`, failing
//! if one is already present — unless the PID recorded inside it is
//! no longer alive, in which case the stale lock is broken.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock at `<state_path>.lock`, breaking it first if
    /// the owning PID is dead.
    pub fn acquire(state_path: &Path) -> Result<LockFile> {
        let path = lock_path(state_path);
        if path.exists() {
            if let Some(pid) = read_owner_pid(&path) {
                if pid_is_alive(pid) {
                    return Err(SyncError::EnvironmentDefect(format!(
                        "lock {} held by running process {pid}",
                        path.display()
                    )));
                }
                // Stale: owning process is gone.
                let _ = fs::remove_file(&path);
            } else {
                return Err(SyncError::EnvironmentDefect(format!(
                    "lock {} present but unreadable",
                    path.display()
                )));
            }
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                SyncError::EnvironmentDefect(format!("acquire lock {}: {e}", path.display()))
            })?;
        write!(file, "{}", std::process::id())
            .map_err(|e| SyncError::EnvironmentDefect(format!("write lock: {e}")))?;
        Ok(LockFile { path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut s = state_path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

fn read_owner_pid(path: &Path) -> Option<i32> {
    let mut buf = String::new();
    fs::File::open(path).ok()?.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

#[cfg(unix)]
fn pid_is_alive(pid: i32) -> bool {
    // Signal 0: no signal sent, just existence/permission check.
    unsafe { libc::kill(pid, 0) == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: i32) -> bool {
    // Conservative: assume alive when we can't check.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_frees_the_path() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("channel.state");
        {
            let _lock = LockFile::acquire(&state_path).unwrap();
            assert!(lock_path(&state_path).exists());
        }
        assert!(!lock_path(&state_path).exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("channel.state");
        let _lock = LockFile::acquire(&state_path).unwrap();
        assert!(LockFile::acquire(&state_path).is_err());
    }

    #[test]
    fn stale_lock_from_dead_pid_is_broken() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("channel.state");
        let path = lock_path(&state_path);
        // A PID essentially guaranteed not to be alive in a test sandbox.
        fs::write(&path, "999999999").unwrap();
        let lock = LockFile::acquire(&state_path);
        assert!(lock.is_ok());
    }
}
