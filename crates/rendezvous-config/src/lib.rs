//! Layered configuration for the rendezvous broker.
//!
//! Values resolve in the usual `ortho_config` order: built-in defaults, then
//! the configuration file (`--config-path` or `RENDEZVOUS_CONFIG_PATH`), then
//! `RENDEZVOUS_*` environment variables, then command-line flags.
//!
//! Beyond logging and runtime paths the configuration carries the policies
//! the bootstrap protocol leaves to the server: what a repeated check-in
//! does, whether look-ups for missing names wait, and which names are
//! answered as unknown without consulting the registry.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod policy;
mod runtime;

pub use defaults::{
    DEFAULT_DENIED_SERVICES, DEFAULT_LOG_FILTER, DEFAULT_LOOKUP_WAIT_MS,
    DEFAULT_REGISTRY_CAPACITY, DEFAULT_SHUTDOWN_GRACE_MS, default_denied_services,
    default_log_filter, default_log_filter_string, default_log_format, default_runtime_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use policy::{CheckInPolicy, DenyList, LookupPolicy, TransportKind};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Flags understood by the configuration loader. Everything after the last
/// of these on the command line belongs to the primary command.
pub const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--runtime-dir",
    "--log-filter",
    "--log-format",
    "--transport",
    "--registry-capacity",
    "--check-in-policy",
    "--lookup-policy",
    "--lookup-wait-ms",
    "--denied-services",
    "--launch-plan",
    "--shutdown-grace-ms",
];

/// Resolved broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "RENDEZVOUS")]
pub struct Config {
    /// Directory for the lock, pid and health files.
    #[ortho_config(default = default_runtime_dir())]
    pub runtime_dir: Utf8PathBuf,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Capability transport.
    #[ortho_config(default = TransportKind::default())]
    pub transport: TransportKind,
    /// Number of registry slots.
    #[ortho_config(default = DEFAULT_REGISTRY_CAPACITY)]
    pub registry_capacity: usize,
    /// Behaviour of check-in for an active name.
    #[ortho_config(default = CheckInPolicy::default())]
    pub check_in_policy: CheckInPolicy,
    /// Behaviour of look-ups for names that are not registered.
    #[ortho_config(default = LookupPolicy::default())]
    pub lookup_policy: LookupPolicy,
    /// Bounded wait applied under [`LookupPolicy::Wait`], in milliseconds.
    #[ortho_config(default = DEFAULT_LOOKUP_WAIT_MS)]
    pub lookup_wait_ms: u64,
    /// Names answered `UNKNOWN_SERVICE` immediately.
    #[ortho_config(default = default_denied_services())]
    pub denied_services: DenyList,
    /// JSON launch plan describing the processes to spawn.
    pub launch_plan: Option<Utf8PathBuf>,
    /// Time children get to exit after SIGTERM, in milliseconds.
    #[ortho_config(default = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            transport: TransportKind::default(),
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            check_in_policy: CheckInPolicy::default(),
            lookup_policy: LookupPolicy::default(),
            lookup_wait_ms: DEFAULT_LOOKUP_WAIT_MS,
            denied_services: default_denied_services(),
            launch_plan: None,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl Config {
    /// Directory for runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Utf8Path {
        self.runtime_dir.as_path()
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Capability transport.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Number of registry slots.
    #[must_use]
    pub const fn registry_capacity(&self) -> usize {
        self.registry_capacity
    }

    /// Behaviour of check-in for an active name.
    #[must_use]
    pub const fn check_in_policy(&self) -> CheckInPolicy {
        self.check_in_policy
    }

    /// Behaviour of look-ups for missing names.
    #[must_use]
    pub const fn lookup_policy(&self) -> LookupPolicy {
        self.lookup_policy
    }

    /// Bounded wait for parked look-ups.
    #[must_use]
    pub const fn lookup_wait(&self) -> Duration {
        Duration::from_millis(self.lookup_wait_ms)
    }

    /// Names answered as unknown without consulting the registry.
    #[must_use]
    pub fn denied_services(&self) -> &DenyList {
        &self.denied_services
    }

    /// Launch plan path, when configured.
    #[must_use]
    pub fn launch_plan(&self) -> Option<&Utf8Path> {
        self.launch_plan.as_deref()
    }

    /// Grace period for children on shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
