//! Spawner for the socket transport.

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::Arc;

use nix::unistd::Pid;
use rendezvous_wire::PortName;

use super::{ChildCommand, SpawnError, Spawner};
use crate::ports::unix::{BOOTSTRAP_FD, BOOTSTRAP_FD_ENV, UnixPortSpace};

/// Starts children with a send right to the broker on descriptor 3.
#[derive(Debug)]
pub struct UnixSpawner {
    space: Arc<UnixPortSpace>,
}

impl UnixSpawner {
    /// Hands children send rights exported from `space`.
    #[must_use]
    pub const fn new(space: Arc<UnixPortSpace>) -> Self {
        Self { space }
    }
}

impl Spawner for UnixSpawner {
    fn spawn(&self, command: &ChildCommand, bootstrap: PortName) -> Result<Pid, SpawnError> {
        let attr_failed = |message: String| SpawnError::AttrFailed {
            program: command.program().clone(),
            message,
        };
        let right: OwnedFd = self
            .space
            .export_send(bootstrap)
            .map_err(|error| attr_failed(error.to_string()))?;
        let raw = right.as_raw_fd();

        let mut process = Command::new(command.program().as_std_path());
        process
            .args(command.arguments())
            .env_clear()
            .envs(command.environment())
            .env(BOOTSTRAP_FD_ENV, BOOTSTRAP_FD.to_string());
        // SAFETY: the closure runs between fork and exec and only calls the
        // async-signal-safe `dup2` and `fcntl`.
        unsafe {
            process.pre_exec(move || install_bootstrap(raw));
        }
        let child = process.spawn().map_err(|source| SpawnError::ExecFailed {
            program: command.program().clone(),
            source,
        })?;
        let pid = i32::try_from(child.id())
            .map_err(|error| attr_failed(error.to_string()))?;
        Ok(Pid::from_raw(pid))
    }
}

/// Places `fd` on [`BOOTSTRAP_FD`] without close-on-exec.
fn install_bootstrap(fd: i32) -> std::io::Result<()> {
    // SAFETY: both descriptors are valid in the forked child.
    let result = unsafe {
        if fd == BOOTSTRAP_FD {
            libc::fcntl(fd, libc::F_SETFD, 0)
        } else {
            libc::dup2(fd, BOOTSTRAP_FD)
        }
    };
    if result < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
