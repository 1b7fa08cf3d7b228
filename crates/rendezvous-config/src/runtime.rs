//! Derives runtime artefact paths for the broker.
//!
//! The runtime directory houses the broker lock, pid, and health snapshots.
//! Launch harnesses read the same files to find a running broker, so the
//! layout is derived here rather than in the daemon.

use std::fs::DirBuilder;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for runtime artefacts written by the broker.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the configuration, creating the runtime
    /// directory with owner-only permissions.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = config.runtime_dir().as_std_path().to_path_buf();
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&runtime_dir)
            .map_err(|source| RuntimePathsError::RuntimeDirectory {
                path: runtime_dir.clone(),
                source,
            })?;
        Ok(Self {
            lock_path: runtime_dir.join("rendezvousd.lock"),
            pid_path: runtime_dir.join("rendezvousd.pid"),
            health_path: runtime_dir.join("rendezvousd.health"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the lock file guarding singleton startup.
    pub fn lock_path(&self) -> &Path {
        self.lock_path.as_path()
    }

    /// Path to the PID file.
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }
}

/// Errors raised while deriving broker runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
