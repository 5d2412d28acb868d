//! Process artifacts in the daemon home directory.
//!
//! - `daemon.pid`: lock file holding the daemon's pid
//! - `daemon.sock`: IPC socket, its presence doubles as a liveness probe
//! - `config.json`: network, pid, start time and socket path for clients
//! - `logs/`: JSON-lines and plain-text logs
//!
//! The PID file is held under an exclusive `flock` for the daemon's lifetime,
//! so the kernel releases it when the process dies. A PID file nobody holds a
//! lock on is stale and gets replaced.

use crate::error::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PID_FILE: &str = "daemon.pid";
pub const SOCKET_FILE: &str = "daemon.sock";
pub const RUNTIME_CONFIG_FILE: &str = "config.json";
pub const LOG_DIR: &str = "logs";

/// Lock attempts before giving up on a PID file that keeps being replaced.
const LOCK_ATTEMPTS: usize = 3;

/// Every path the daemon owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub home: PathBuf,
    pub pid_file: PathBuf,
    pub socket: PathBuf,
    pub runtime_config: PathBuf,
    pub log_dir: PathBuf,
}

impl DaemonPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            pid_file: home.join(PID_FILE),
            socket: home.join(SOCKET_FILE),
            runtime_config: home.join(RUNTIME_CONFIG_FILE),
            log_dir: home.join(LOG_DIR),
            home,
        }
    }
}

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub network: String,
    pub pid: u32,
    /// Milliseconds since Unix epoch.
    pub started_at: u64,
    pub socket_path: PathBuf,
    pub version: String,
}

/// Owns the PID lock and the files written next to it.
///
/// Files are removed by [`ProcessArtifacts::cleanup`] or, failing that, on drop.
#[derive(Debug)]
pub struct ProcessArtifacts {
    paths: DaemonPaths,
    pid: u32,
    /// `None` once released.
    lock: Option<File>,
}

impl ProcessArtifacts {
    /// Create the home directory and take the PID lock.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] while another live holder
    /// has the lock, including another guard in this process.
    pub fn acquire(paths: DaemonPaths, pid: u32) -> DaemonResult<Self> {
        std::fs::create_dir_all(&paths.home).map_err(|source| DaemonError::Artifact {
            path: paths.home.clone(),
            source,
        })?;
        let artifact_err = |source| DaemonError::Artifact {
            path: paths.pid_file.clone(),
            source,
        };

        for _ in 0..LOCK_ATTEMPTS {
            let mut file = open_lock_file(&paths.pid_file).map_err(artifact_err)?;
            if !try_lock(&file).map_err(artifact_err)? {
                return Err(DaemonError::AlreadyRunning {
                    pid: read_pid(&paths.pid_file),
                });
            }
            // The previous holder may have unlinked the file between open and lock.
            if !is_current_file(&file, &paths.pid_file) {
                debug!(path = %paths.pid_file.display(), "PID file replaced while locking, retrying");
                continue;
            }

            if let Some(previous) = read_pid(&paths.pid_file) {
                warn!(pid = previous, path = %paths.pid_file.display(), "Replacing stale PID file");
            }
            file.set_len(0).map_err(artifact_err)?;
            file.write_all(format!("{pid}\n").as_bytes()).map_err(artifact_err)?;
            file.sync_all().map_err(artifact_err)?;
            info!(pid, path = %paths.pid_file.display(), "PID lock acquired");

            return Ok(Self {
                paths,
                pid,
                lock: Some(file),
            });
        }

        Err(artifact_err(std::io::Error::other(
            "PID file kept changing while locking",
        )))
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn write_runtime_config(&self, config: &RuntimeConfig) -> DaemonResult<()> {
        let body = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.paths.runtime_config, &body)?;
        debug!(path = %self.paths.runtime_config.display(), "Runtime config written");
        Ok(())
    }

    /// Remove the socket, runtime config and PID file, then release the lock.
    /// Safe to call twice.
    pub fn cleanup(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        remove_if_exists(&self.paths.socket);
        remove_if_exists(&self.paths.runtime_config);
        // Unlink while still locked; a waiter that opened this inode sees
        // it is gone and retries on a fresh file.
        remove_if_exists(&self.paths.pid_file);
        drop(lock);
        info!(home = %self.paths.home.display(), "Process artifacts removed");
    }
}

impl Drop for ProcessArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

/// Non-blocking exclusive lock. `Ok(false)` when someone else holds it.
fn try_lock(file: &File) -> std::io::Result<bool> {
    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Whether `path` still names the inode behind `file`.
fn is_current_file(file: &File, path: &Path) -> bool {
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Write via a temporary sibling and rename so readers never see partial data.
fn write_atomic(path: &Path, body: &[u8]) -> DaemonResult<()> {
    let tmp = path.with_extension("tmp");
    let artifact_err = |source| DaemonError::Artifact {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, body).map_err(artifact_err)?;
    std::fs::rename(&tmp, path).map_err(artifact_err)
}

fn remove_if_exists(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path().join("home"));

        let mut artifacts = ProcessArtifacts::acquire(paths.clone(), std::process::id()).unwrap();
        assert_eq!(read_pid(&paths.pid_file), Some(std::process::id()));

        artifacts
            .write_runtime_config(&RuntimeConfig {
                network: "mainnet".to_string(),
                pid: std::process::id(),
                started_at: 1,
                socket_path: paths.socket.clone(),
                version: "0.1.0".to_string(),
            })
            .unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths.runtime_config).unwrap()).unwrap();
        assert_eq!(written["network"], "mainnet");
        assert_eq!(written["startedAt"], 1);
        assert!(written["socketPath"].as_str().unwrap().ends_with(SOCKET_FILE));

        artifacts.cleanup();
        assert!(!paths.pid_file.exists());
        assert!(!paths.runtime_config.exists());
        artifacts.cleanup();
    }

    #[test]
    fn test_held_lock_blocks_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());
        std::fs::write(&paths.pid_file, std::process::id().to_string()).unwrap();

        let first = ProcessArtifacts::acquire(paths.clone(), std::process::id()).unwrap();
        let err = ProcessArtifacts::acquire(paths.clone(), std::process::id()).unwrap_err();
        assert!(
            matches!(err, DaemonError::AlreadyRunning { pid: Some(pid) } if pid == std::process::id())
        );

        // The refused attempt leaves the holder's files alone.
        assert_eq!(read_pid(&paths.pid_file), Some(std::process::id()));
        drop(first);
        assert!(!paths.pid_file.exists());
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let paths = paths.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    ProcessArtifacts::acquire(paths, 1000 + i)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(read_pid(&paths.pid_file), Some(winners[0].pid()));
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, DaemonError::AlreadyRunning { .. })));
    }

    #[test]
    fn test_released_lock_can_be_retaken() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());

        let mut first = ProcessArtifacts::acquire(paths.clone(), 41).unwrap();
        first.cleanup();
        let second = ProcessArtifacts::acquire(paths.clone(), 42).unwrap();
        assert_eq!(read_pid(&paths.pid_file), Some(42));
        drop(first);
        // Dropping the released guard must not touch the new holder's file.
        assert_eq!(read_pid(&paths.pid_file), Some(42));
        drop(second);
    }

    #[test]
    fn test_unlocked_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());
        // Left behind by a daemon that died; nobody holds its lock.
        std::fs::write(&paths.pid_file, std::process::id().to_string()).unwrap();

        let artifacts = ProcessArtifacts::acquire(paths.clone(), 77).unwrap();
        assert_eq!(read_pid(&paths.pid_file), Some(77));
        drop(artifacts);
        assert!(!paths.pid_file.exists());
    }

    #[test]
    fn test_garbage_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path());
        std::fs::write(&paths.pid_file, "not-a-pid").unwrap();

        let artifacts = ProcessArtifacts::acquire(paths.clone(), 77).unwrap();
        assert_eq!(read_pid(&paths.pid_file), Some(77));
        drop(artifacts);
    }
}
