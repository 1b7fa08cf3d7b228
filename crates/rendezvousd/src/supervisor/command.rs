//! What a child is started with.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;

use camino::Utf8PathBuf;

/// Executable, arguments and environment of a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    program: Utf8PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    inherit_env: Vec<String>,
    clear_env: bool,
}

impl ChildCommand {
    /// A command that inherits the broker's whole environment.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            inherit_env: Vec::new(),
            clear_env: false,
        }
    }

    /// A command that starts from an empty environment and only copies the
    /// named variables from the broker.
    #[must_use]
    pub fn isolated(program: impl Into<Utf8PathBuf>, inherit_env: Vec<String>) -> Self {
        Self {
            inherit_env,
            clear_env: true,
            ..Self::new(program)
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets explicit environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Executable path.
    #[must_use]
    pub const fn program(&self) -> &Utf8PathBuf {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// The complete environment the child starts with, sorted by name.
    ///
    /// Explicit variables win over inherited ones.
    #[must_use]
    pub fn environment(&self) -> Vec<(OsString, OsString)> {
        let mut merged: BTreeMap<OsString, OsString> = if self.clear_env {
            self.inherit_env
                .iter()
                .filter_map(|name| env::var_os(name).map(|value| (OsString::from(name), value)))
                .collect()
        } else {
            env::vars_os().collect()
        };
        merged.extend(
            self.env
                .iter()
                .map(|(key, value)| (OsString::from(key), OsString::from(value))),
        );
        merged.into_iter().collect()
    }
}
