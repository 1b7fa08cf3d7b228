//! Unified error surface for broker launch.

use std::io;
use std::path::PathBuf;
use std::time::SystemTimeError;

use nix::errno::Errno;
use rendezvous_config::{RuntimePathsError, TransportKind};
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::broker::BrokerError;
use crate::supervisor::PlanError;

/// Errors surfaced while launching or running the broker process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The command line could not be split into flags and a command.
    #[error("invalid command line: {message}")]
    Arguments {
        /// What was wrong.
        message: String,
    },
    /// Loading configuration or telemetry failed.
    #[error("broker bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A live broker already holds the lock.
    #[error("broker already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale runtime file failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the file that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the health snapshot failed.
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        /// Health file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Reading the clock failed.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Probing the pid recorded by a previous broker failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID whose liveness check failed.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Health updates were attempted before writing the PID file.
    #[error("pid must be written before updating health state")]
    MissingPid,
    /// The launch plan could not be loaded.
    #[error("failed to load launch plan: {source}")]
    Plan {
        /// Underlying plan error.
        #[source]
        source: PlanError,
    },
    /// The configured transport is not available on this host.
    #[error("transport {kind} is not available on this host")]
    UnsupportedTransport {
        /// Configured transport.
        kind: TransportKind,
    },
    /// The broker loop failed.
    #[error("broker failed: {source}")]
    Broker {
        /// Underlying broker error.
        #[source]
        source: BrokerError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<PlanError> for LaunchError {
    fn from(source: PlanError) -> Self {
        Self::Plan { source }
    }
}

impl From<BrokerError> for LaunchError {
    fn from(source: BrokerError) -> Self {
        Self::Broker { source }
    }
}
