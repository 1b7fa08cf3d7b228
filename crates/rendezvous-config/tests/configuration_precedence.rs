//! Behavioural coverage of configuration layering.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use rendezvous_config::{
    CheckInPolicy, Config, DEFAULT_REGISTRY_CAPACITY, LookupPolicy, default_denied_services,
    default_log_filter, default_log_format,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    env_guard: Option<MutexGuard<'static, ()>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        // Every harness reads the process environment, so scenarios run one
        // at a time.
        let env_guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("rendezvousd")]),
            env_overrides: RefCell::new(Vec::new()),
            env_guard: Some(env_guard),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn write_config(&self, contents: &str) {
        let path = self.temp_dir.path().join("rendezvous.toml");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` on newer toolchains. `Drop`
        // restores every override while the mutex is still held.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let overrides = std::mem::take(self.env_overrides.get_mut());
        for (key, value) in overrides.into_iter().rev() {
            match value {
                Some(os_value) => unsafe { std::env::set_var(&key, os_value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
        drop(self.env_guard.take());
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

fn parse_policy(text: &str) -> LookupPolicy {
    match text.parse::<LookupPolicy>() {
        Ok(policy) => policy,
        Err(error) => panic!("invalid lookup policy '{text}': {error}"),
    }
}

#[given("no configuration sources")]
fn given_no_sources(harness: &Harness) {
    let _ = harness;
}

#[given("a configuration file setting the lookup policy to \"{policy}\"")]
fn given_configuration_file(harness: &Harness, policy: String) {
    harness.write_config(&format!("lookup_policy = \"{policy}\"\nlookup_wait_ms = 750\n"));
}

#[given("the environment overrides the lookup policy to \"{policy}\"")]
fn given_environment_override(harness: &Harness, policy: String) {
    harness.set_env("RENDEZVOUS_LOOKUP_POLICY", &policy);
}

#[when("the command line sets the lookup policy to \"{policy}\"")]
fn when_cli_override(harness: &Harness, policy: String) {
    harness.push_cli_arg("--lookup-policy");
    harness.push_cli_arg(policy);
}

#[when("the command line sets the denied services to \"{services}\"")]
fn when_cli_denies(harness: &Harness, services: String) {
    harness.push_cli_arg("--denied-services");
    harness.push_cli_arg(services);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the lookup policy to \"{policy}\"")]
fn then_resolved_policy(harness: &Harness, policy: String) {
    let config = harness.config();
    assert_eq!(config.lookup_policy(), parse_policy(&policy));
    assert_eq!(config.lookup_wait_ms, 750, "file values survive overrides");
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.registry_capacity(), DEFAULT_REGISTRY_CAPACITY);
    assert_eq!(config.check_in_policy(), CheckInPolicy::Reject);
    assert_eq!(config.lookup_policy(), LookupPolicy::Immediate);
    assert_eq!(config.denied_services(), &default_denied_services());
    assert!(config.launch_plan().is_none());
}

#[then("the denied services are \"{services}\"")]
fn then_denied_services(harness: &Harness, services: String) {
    let config = harness.config();
    assert_eq!(config.denied_services().to_string(), services);
    assert!(config.denied_services().denies("com.example.b.helper"));
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Built-in defaults apply without overrides"
)]
fn defaults_apply(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Environment overrides the configuration file"
)]
fn environment_overrides_file(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Command line overrides the environment"
)]
fn command_line_overrides_environment(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Deny list accepts comma separated overrides"
)]
fn deny_list_overrides(#[from(harness)] harness: Harness) {
    let _ = harness;
}
