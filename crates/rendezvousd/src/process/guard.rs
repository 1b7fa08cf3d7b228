//! Lock, pid and health files in the runtime directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use rendezvous_config::RuntimePaths;
use rendezvous_wire::PortName;
use serde::Serialize;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

/// Holds the broker lock and keeps the pid and health files current.
/// Dropping it removes all three files.
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
    port: Option<PortName>,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
            port: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{pid}\n").as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    /// Records the rendezvous port so harnesses can find the broker.
    pub(super) fn set_port(&mut self, port: PortName) {
        self.port = Some(port);
    }

    pub(super) fn write_health(&self, state: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let snapshot = HealthSnapshot::new(state, pid, self.port)?;
        let mut contents = serde_json::to_vec(&snapshot)?;
        contents.push(b'\n');
        let path = self.paths.health_path();
        atomic_write(path, &contents).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for (path, label) in [
            (self.paths.health_path(), "health"),
            (self.paths.pid_path(), "pid"),
            (self.paths.lock_path(), "lock"),
        ] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path.display(),
                        %error,
                        "failed to remove {label} file"
                    );
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u32>,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(state: HealthState, pid: u32, port: Option<PortName>) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            port: port.map(PortName::raw),
            timestamp,
        })
    }
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(paths.lock_path()) {
        Ok(mut file) => {
            // The lock names its owner even before the pid file exists.
            if let Err(error) = writeln!(file, "{}", std::process::id()) {
                warn!(target: PROCESS_TARGET, %error, "failed to stamp lock file");
            }
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired broker lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => reclaim_stale_lock(paths),
        Err(source) => Err(LaunchError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn reclaim_stale_lock(paths: &RuntimePaths) -> Result<File, LaunchError> {
    let recorded = read_pid(paths.pid_path()).or_else(|| read_pid(paths.lock_path()));
    if let Some(pid) = recorded.filter(|pid| *pid != 0) {
        if process_alive(pid)? {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: existing broker alive"
            );
            return Err(LaunchError::AlreadyRunning { pid });
        }
        warn!(
            target: PROCESS_TARGET,
            pid,
            "previous broker not running; removing stale runtime files"
        );
    }
    for path in [paths.lock_path(), paths.pid_path(), paths.health_path()] {
        remove_stale(path)?;
    }
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_stale(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LaunchError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn process_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(LaunchError::CheckProcess { pid, source }),
    }
}
