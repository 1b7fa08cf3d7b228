use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::policy::DenyList;

/// Default log filter expression used by the broker.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of registry slots.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 128;

/// Default bounded wait for parked look-ups, in milliseconds.
pub const DEFAULT_LOOKUP_WAIT_MS: u64 = 2_000;

/// Default grace period granted to children on shutdown, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Services clients look up that the broker deliberately never provides.
pub const DEFAULT_DENIED_SERVICES: &[&str] = &["com.apple.oahd"];

/// Default log filter expression used by the broker.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the broker.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default deny list.
pub fn default_denied_services() -> DenyList {
    DenyList::new(DEFAULT_DENIED_SERVICES.iter().copied())
}

/// Computes the default runtime directory for lock, pid and health files.
pub fn default_runtime_dir() -> Utf8PathBuf {
    default_runtime_dir_inner()
}

#[cfg(unix)]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("rendezvous");
    if apply_namespace {
        base.push(user_namespace());
    }
    base
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_runtime_dir_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push("rendezvous");
    base
}
