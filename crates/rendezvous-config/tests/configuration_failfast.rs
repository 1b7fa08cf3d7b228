//! Configuration errors surface before the broker starts.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rendezvous_config::{CheckInPolicy, Config};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    guard: Option<MutexGuard<'static, ()>>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            guard: Some(guard),
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
        drop(self.guard.take());
    }
}

fn args_with_config(path: &std::path::Path) -> Vec<OsString> {
    vec![
        OsString::from("rendezvousd"),
        OsString::from("--config-path"),
        path.as_os_str().to_owned(),
    ]
}

#[test]
fn malformed_configuration_file_is_rejected() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("rendezvous.toml");
    fs::write(&path, "registry_capacity = \n").expect("write malformed config");

    let error = Config::load_from_iter(args_with_config(&path)).expect_err("loading must fail");
    assert!(
        !error.to_string().is_empty(),
        "errors should describe the failure"
    );
}

#[test]
fn unknown_policy_in_the_environment_is_rejected() {
    let _env = EnvOverride::set_var("RENDEZVOUS_CHECK_IN_POLICY", OsStr::new("overwrite"));

    let result = Config::load_from_iter([OsString::from("rendezvousd")]);
    assert!(result.is_err(), "an unknown policy must not load");
}

#[test]
fn unknown_policy_on_the_command_line_is_rejected() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let args = [
        OsString::from("rendezvousd"),
        OsString::from("--check-in-policy"),
        OsString::from("overwrite"),
    ];

    assert!(Config::load_from_iter(args).is_err());
}

#[test]
fn configuration_file_values_load() {
    let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("rendezvous.toml");
    fs::write(
        &path,
        concat!(
            "registry_capacity = 4\n",
            "check_in_policy = \"replace\"\n",
            "denied_services = [\"com.example.blocked\"]\n",
            "shutdown_grace_ms = 10\n",
        ),
    )
    .expect("write config");

    let config = Config::load_from_iter(args_with_config(&path)).expect("config loads");
    assert_eq!(config.registry_capacity(), 4);
    assert_eq!(config.check_in_policy(), CheckInPolicy::Replace);
    assert!(config.denied_services().denies("com.example.blocked"));
    assert!(!config.denied_services().denies("com.apple.oahd"));
    assert_eq!(config.shutdown_grace().as_millis(), 10);
}
