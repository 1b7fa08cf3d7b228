//! Staged launch plans.
//!
//! A plan is a JSON document listing the processes to start, in order:
//!
//! ```json
//! {
//!   "stages": [
//!     {
//!       "program": "/opt/sim/bin/backboardd",
//!       "env": { "SIM_ROOT": "/opt/sim" },
//!       "inherit_env": ["HOME"],
//!       "wait_for": ["com.apple.backboard"],
//!       "wait_timeout_ms": 5000,
//!       "remove_before_spawn": ["/tmp/sim_framebuffer"]
//!     },
//!     { "program": "/opt/sim/bin/app", "role": "primary" }
//!   ]
//! }
//! ```
//!
//! The broker loop drives a [`LaunchSequence`]: a stage with `wait_for`
//! holds back the next stage until every listed substring matches a
//! registered service, or until its timeout elapses.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{ChildCommand, Role, SUPERVISOR_TARGET, SpawnError, Supervisor};
use crate::registry::Registry;

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading a launch plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file could not be read.
    #[error("failed to read launch plan {path}: {source}")]
    Read {
        /// Plan path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The plan is not valid JSON for a plan.
    #[error("invalid launch plan {path}: {source}")]
    Parse {
        /// Plan path.
        path: Utf8PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// More than one stage is marked primary.
    #[error("launch plan {path} has {count} primary stages")]
    MultiplePrimaries {
        /// Plan path.
        path: Utf8PathBuf,
        /// Number of primary stages.
        count: usize,
    },
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// One process in a launch plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchStage {
    /// Executable path.
    pub program: Utf8PathBuf,
    /// Arguments after the program name.
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Variables copied from the broker's environment.
    #[serde(default)]
    pub inherit_env: Vec<String>,
    /// Role of the spawned child.
    #[serde(default)]
    pub role: Role,
    /// Service-name substrings that must be registered before the next
    /// stage starts.
    #[serde(default)]
    pub wait_for: Vec<String>,
    /// Longest wait for `wait_for`, in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Stale files removed before spawning and again on shutdown.
    #[serde(default)]
    pub remove_before_spawn: Vec<Utf8PathBuf>,
}

impl LaunchStage {
    /// A primary stage running `command` with no readiness wait.
    #[must_use]
    pub fn primary(program: Utf8PathBuf, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            env: BTreeMap::new(),
            inherit_env: Vec::new(),
            role: Role::Primary,
            wait_for: Vec::new(),
            wait_timeout_ms: 0,
            remove_before_spawn: Vec::new(),
        }
    }

    fn command(&self, isolated: bool) -> ChildCommand {
        let base = if isolated {
            ChildCommand::isolated(self.program.clone(), self.inherit_env.clone())
        } else {
            ChildCommand::new(self.program.clone())
        };
        base.args(self.args.iter().cloned())
            .envs(self.env.iter().map(|(key, value)| (key.clone(), value.clone())))
    }
}

/// Ordered stages to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchPlan {
    /// Stages in launch order.
    pub stages: Vec<LaunchStage>,
}

impl LaunchPlan {
    /// Reads a plan from `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, PlanError> {
        let text = fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_owned(),
            source,
        })?;
        let plan: Self = serde_json::from_str(&text).map_err(|source| PlanError::Parse {
            path: path.to_owned(),
            source,
        })?;
        let count = plan
            .stages
            .iter()
            .filter(|stage| stage.role == Role::Primary)
            .count();
        if count > 1 {
            return Err(PlanError::MultiplePrimaries {
                path: path.to_owned(),
                count,
            });
        }
        Ok(plan)
    }
}

#[derive(Debug)]
struct Readiness {
    patterns: Vec<String>,
    deadline: Instant,
}

impl Readiness {
    fn satisfied(&self, registry: &Registry) -> bool {
        self.patterns
            .iter()
            .all(|pattern| registry.names().any(|name| name.contains(pattern.as_str())))
    }
}

/// Progress through a launch plan.
#[derive(Debug)]
pub struct LaunchSequence {
    stages: VecDeque<(LaunchStage, bool)>,
    waiting: Option<Readiness>,
    artefacts: Vec<Utf8PathBuf>,
}

impl LaunchSequence {
    /// Starts a sequence over `plan`. Plan stages start from an empty
    /// environment; `command_line` is the stage given on the command line,
    /// which inherits the broker's environment.
    #[must_use]
    pub fn new(plan: LaunchPlan, command_line: Option<LaunchStage>) -> Self {
        let mut stages: VecDeque<(LaunchStage, bool)> = plan
            .stages
            .into_iter()
            .map(|stage| (stage, true))
            .collect();
        if let Some(stage) = command_line {
            stages.retain(|(existing, _)| existing.role != Role::Primary);
            stages.push_back((stage, false));
        }
        Self {
            stages,
            waiting: None,
            artefacts: Vec::new(),
        }
    }

    /// Spawns every stage whose turn has come.
    ///
    /// Secondary failures are logged and skipped; a primary failure is
    /// returned.
    pub fn advance(
        &mut self,
        supervisor: &mut Supervisor,
        registry: &Registry,
        now: Instant,
    ) -> Result<(), SpawnError> {
        loop {
            if let Some(readiness) = &self.waiting {
                if readiness.satisfied(registry) {
                    info!(
                        target: SUPERVISOR_TARGET,
                        services = ?readiness.patterns,
                        "launch stage ready"
                    );
                } else if now >= readiness.deadline {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        services = ?readiness.patterns,
                        "timed out waiting for services; continuing launch"
                    );
                } else {
                    return Ok(());
                }
                self.waiting = None;
            }
            let Some((stage, isolated)) = self.stages.pop_front() else {
                return Ok(());
            };
            self.launch(supervisor, &stage, isolated, now)?;
        }
    }

    fn launch(
        &mut self,
        supervisor: &mut Supervisor,
        stage: &LaunchStage,
        isolated: bool,
        now: Instant,
    ) -> Result<(), SpawnError> {
        for path in &stage.remove_before_spawn {
            remove_artefact(path);
        }
        self.artefacts.extend(stage.remove_before_spawn.iter().cloned());
        match supervisor.spawn(stage.command(isolated), stage.role) {
            Ok(_) => {
                if !stage.wait_for.is_empty() {
                    self.waiting = Some(Readiness {
                        patterns: stage.wait_for.clone(),
                        deadline: now + Duration::from_millis(stage.wait_timeout_ms),
                    });
                }
                Ok(())
            }
            Err(error) if stage.role == Role::Secondary => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    program = %stage.program,
                    %error,
                    "secondary stage failed to start"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// When the current readiness wait gives up.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.waiting.as_ref().map(|readiness| readiness.deadline)
    }

    /// Whether every stage has been launched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stages.is_empty() && self.waiting.is_none()
    }

    /// Removes the stale artefacts the launched stages declared.
    pub fn remove_artefacts(&mut self) {
        for path in std::mem::take(&mut self.artefacts) {
            remove_artefact(&path);
        }
    }
}

fn remove_artefact(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(target: SUPERVISOR_TARGET, %path, "removed stale artefact"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: SUPERVISOR_TARGET,
            %path,
            %error,
            "failed to remove artefact"
        ),
    }
}
