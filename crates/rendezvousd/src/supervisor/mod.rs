//! Child process supervision.
//!
//! The supervisor starts children through a [`Spawner`], which installs the
//! broker's rendezvous port as the child's bootstrap port before the child
//! runs, and tracks them by [`Role`]. At most one primary child exists; its
//! exit shuts the broker down. Reaping is non-blocking and only touches
//! tracked pids.

use std::fmt;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{AccessFlags, Pid, access};
use rendezvous_wire::PortName;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

mod command;
#[cfg(target_os = "macos")]
mod mach;
mod plan;
#[cfg(unix)]
mod unix;

pub use self::command::ChildCommand;
#[cfg(target_os = "macos")]
pub use self::mach::MachSpawner;
pub use self::plan::{LaunchPlan, LaunchSequence, LaunchStage, PlanError};
#[cfg(unix)]
pub use self::unix::UnixSpawner;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// How a child's exit affects the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The broker shuts down when this child exits.
    Primary,
    /// Exits are logged and otherwise ignored.
    #[default]
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        })
    }
}

/// Errors raised while spawning a child.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable is missing, not executable, or could not be started.
    #[error("failed to execute {program}: {source}")]
    ExecFailed {
        /// Executable path.
        program: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bootstrap port could not be installed in the child.
    #[error("failed to prepare {program}: {message}")]
    AttrFailed {
        /// Executable path.
        program: Utf8PathBuf,
        /// What failed.
        message: String,
    },
    /// A primary child is already running.
    #[error("primary child {pid} is already running")]
    PrimaryExists {
        /// Pid of the running primary.
        pid: Pid,
    },
}

/// Errors raised while reaping or signalling children.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Waiting for a child failed.
    #[error("failed to wait for child {pid}: {source}")]
    Wait {
        /// Child pid.
        pid: Pid,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// Signalling a child failed.
    #[error("failed to send {signal} to child {pid}: {source}")]
    Signal {
        /// Child pid.
        pid: Pid,
        /// Signal sent.
        signal: Signal,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
}

/// Starts children with the broker's port as their bootstrap port.
pub trait Spawner: Send {
    /// Starts `command` with a send right to `bootstrap` installed as its
    /// bootstrap port and returns its pid.
    fn spawn(&self, command: &ChildCommand, bootstrap: PortName) -> Result<Pid, SpawnError>;
}

/// A child the supervisor tracks until it is reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChild {
    /// Process id.
    pub pid: Pid,
    /// Role of the child.
    pub role: Role,
    /// What the child was started with.
    pub command: ChildCommand,
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Exited with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
    /// Reaped elsewhere; no status is available.
    Lost,
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(signal) => write!(f, "signal {signal}"),
            Self::Lost => f.write_str("unknown status"),
        }
    }
}

/// A reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Process id.
    pub pid: Pid,
    /// How it ended.
    pub status: ChildStatus,
}

/// What the broker does after a child exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// The primary exited; shut down.
    Shutdown,
    /// Keep running.
    Continue,
}

/// Tracks the broker's children.
pub struct Supervisor {
    spawner: Box<dyn Spawner>,
    bootstrap: PortName,
    children: Vec<PendingChild>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("bootstrap", &self.bootstrap)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Builds a supervisor starting children through `spawner`.
    #[must_use]
    pub fn new(spawner: Box<dyn Spawner>) -> Self {
        Self {
            spawner,
            bootstrap: PortName::NULL,
            children: Vec::new(),
        }
    }

    /// Sets the port children receive as their bootstrap port.
    pub fn install_bootstrap(&mut self, port: PortName) {
        self.bootstrap = port;
    }

    /// Validates and starts `command` in `role`.
    pub fn spawn(&mut self, command: ChildCommand, role: Role) -> Result<Pid, SpawnError> {
        if let Some(primary) = self.primary().filter(|_| role == Role::Primary) {
            return Err(SpawnError::PrimaryExists { pid: primary.pid });
        }
        check_executable(command.program())?;
        if self.bootstrap.is_null() {
            return Err(SpawnError::AttrFailed {
                program: command.program().clone(),
                message: "no bootstrap port installed".to_owned(),
            });
        }
        let pid = self.spawner.spawn(&command, self.bootstrap)?;
        info!(
            target: SUPERVISOR_TARGET,
            pid = pid.as_raw(),
            %role,
            program = %command.program(),
            "spawned child"
        );
        self.children.push(PendingChild { pid, role, command });
        Ok(pid)
    }

    /// Collects every tracked child that has exited, without blocking.
    pub fn reap(&mut self) -> Vec<ChildExit> {
        let mut exits = Vec::new();
        for child in &self.children {
            match try_wait(child.pid) {
                Ok(Some(exit)) => exits.push(exit),
                Ok(None) => {}
                Err(error) => warn!(target: SUPERVISOR_TARGET, %error, "reap failed"),
            }
        }
        exits
    }

    /// Forgets a reaped child and decides whether the broker keeps running.
    pub fn on_child_exit(&mut self, exit: &ChildExit) -> ExitDisposition {
        let Some(index) = self.children.iter().position(|child| child.pid == exit.pid) else {
            info!(
                target: SUPERVISOR_TARGET,
                pid = exit.pid.as_raw(),
                status = %exit.status,
                "untracked child exited"
            );
            return ExitDisposition::Continue;
        };
        let child = self.children.remove(index);
        info!(
            target: SUPERVISOR_TARGET,
            pid = exit.pid.as_raw(),
            role = %child.role,
            status = %exit.status,
            program = %child.command.program(),
            "child exited"
        );
        match child.role {
            Role::Primary => ExitDisposition::Shutdown,
            Role::Secondary => ExitDisposition::Continue,
        }
    }

    /// Sends SIGTERM to every child, reaps them for up to `grace`, then
    /// kills and reaps whatever is left.
    pub fn terminate_all(&mut self, grace: Duration) -> Vec<ChildExit> {
        let mut exits = Vec::new();
        if self.children.is_empty() {
            return exits;
        }
        self.signal_all(Signal::SIGTERM);
        let deadline = Instant::now() + grace;
        while !self.children.is_empty() && Instant::now() < deadline {
            self.collect(&mut exits);
            if !self.children.is_empty() {
                thread::sleep(REAP_INTERVAL);
            }
        }
        if self.children.is_empty() {
            return exits;
        }

        self.signal_all(Signal::SIGKILL);
        for child in std::mem::take(&mut self.children) {
            let status = match waitpid(child.pid, None) {
                Ok(status) => exit_of(status).map_or(ChildStatus::Lost, |exit| exit.status),
                Err(source) => {
                    let error = SupervisorError::Wait {
                        pid: child.pid,
                        source,
                    };
                    warn!(target: SUPERVISOR_TARGET, %error, "failed to reap killed child");
                    ChildStatus::Lost
                }
            };
            exits.push(ChildExit {
                pid: child.pid,
                status,
            });
        }
        exits
    }

    /// The primary child, if one is running.
    #[must_use]
    pub fn primary(&self) -> Option<&PendingChild> {
        self.children
            .iter()
            .find(|child| child.role == Role::Primary)
    }

    /// Tracked children in spawn order.
    #[must_use]
    pub fn children(&self) -> &[PendingChild] {
        &self.children
    }

    fn collect(&mut self, exits: &mut Vec<ChildExit>) {
        for exit in self.reap() {
            self.children.retain(|child| child.pid != exit.pid);
            exits.push(exit);
        }
    }

    fn signal_all(&self, signal: Signal) {
        for child in &self.children {
            match kill(child.pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(source) => {
                    let error = SupervisorError::Signal {
                        pid: child.pid,
                        signal,
                        source,
                    };
                    warn!(target: SUPERVISOR_TARGET, %error, "failed to signal child");
                }
            }
        }
    }
}

fn check_executable(program: &Utf8Path) -> Result<(), SpawnError> {
    let exec_failed = |source: io::Error| SpawnError::ExecFailed {
        program: program.to_owned(),
        source,
    };
    let metadata = program.metadata().map_err(exec_failed)?;
    if !metadata.is_file() {
        return Err(exec_failed(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    access(program.as_std_path(), AccessFlags::X_OK)
        .map_err(|errno| exec_failed(io::Error::from(errno)))
}

fn try_wait(pid: Pid) -> Result<Option<ChildExit>, SupervisorError> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => Ok(exit_of(status)),
        Err(Errno::ECHILD) => Ok(Some(ChildExit {
            pid,
            status: ChildStatus::Lost,
        })),
        Err(source) => Err(SupervisorError::Wait { pid, source }),
    }
}

fn exit_of(status: WaitStatus) -> Option<ChildExit> {
    match status {
        WaitStatus::Exited(pid, code) => Some(ChildExit {
            pid,
            status: ChildStatus::Exited(code),
        }),
        WaitStatus::Signaled(pid, signal, _) => Some(ChildExit {
            pid,
            status: ChildStatus::Signaled(signal),
        }),
        _ => None,
    }
}
