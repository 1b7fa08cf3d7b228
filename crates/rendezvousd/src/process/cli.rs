//! Splits the command line into configuration flags and the primary command.
//!
//! `rendezvousd [config flags] [--] [primary [args...]]`
//!
//! Leading flags listed in [`CONFIG_CLI_FLAGS`] go to the configuration
//! loader. The first other token, or everything after `--`, is the primary
//! command. Flags after the command belong to the command.

use std::ffi::{OsStr, OsString};

use camino::Utf8PathBuf;
use rendezvous_config::CONFIG_CLI_FLAGS;

use super::errors::LaunchError;
use crate::supervisor::LaunchStage;

const HELP_FLAGS: &[&str] = &["-h", "--help"];

#[derive(Debug, Clone, Copy)]
enum FlagAction {
    Include { needs_value: bool },
    Command,
    Unknown,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with('-') {
        return FlagAction::Command;
    }
    let mut parts = text.splitn(2, '=');
    let flag = parts.next().unwrap_or_default();
    let has_inline_value = parts.next().is_some();
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else if HELP_FLAGS.contains(&flag) {
        FlagAction::Include { needs_value: false }
    } else {
        FlagAction::Unknown
    }
}

/// The command line split for the loader and the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    config_arguments: Vec<OsString>,
    primary: Option<(Utf8PathBuf, Vec<String>)>,
}

impl CommandLine {
    /// Splits `args`, whose first element is the program name.
    pub fn parse(args: &[OsString]) -> Result<Self, LaunchError> {
        let mut tokens = args.iter();
        let mut config_arguments: Vec<OsString> = tokens.next().cloned().into_iter().collect();
        let mut command: Vec<&OsString> = Vec::new();

        while let Some(argument) = tokens.next() {
            if argument == "--" {
                command.extend(tokens.by_ref());
                break;
            }
            match classify(argument) {
                FlagAction::Include { needs_value } => {
                    config_arguments.push(argument.clone());
                    if needs_value {
                        let value = tokens.next().ok_or_else(|| LaunchError::Arguments {
                            message: format!("{} requires a value", argument.to_string_lossy()),
                        })?;
                        config_arguments.push(value.clone());
                    }
                }
                FlagAction::Command => {
                    command.push(argument);
                    command.extend(tokens.by_ref());
                    break;
                }
                FlagAction::Unknown => {
                    return Err(LaunchError::Arguments {
                        message: format!(
                            "unknown option {}; use -- before a command that starts with '-'",
                            argument.to_string_lossy()
                        ),
                    });
                }
            }
        }

        let primary = match command.split_first() {
            None => None,
            Some((program, rest)) => {
                let program = utf8(program)?;
                let args = rest
                    .iter()
                    .map(|arg| utf8(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Some((Utf8PathBuf::from(program), args))
            }
        };
        Ok(Self {
            config_arguments,
            primary,
        })
    }

    /// Program name followed by the configuration flags.
    #[must_use]
    pub fn config_arguments(&self) -> &[OsString] {
        &self.config_arguments
    }

    /// The primary command as a launch stage, when one was given.
    #[must_use]
    pub fn primary_stage(&self) -> Option<LaunchStage> {
        self.primary
            .as_ref()
            .map(|(program, args)| LaunchStage::primary(program.clone(), args.clone()))
    }
}

fn utf8(argument: &OsString) -> Result<String, LaunchError> {
    argument
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| LaunchError::Arguments {
            message: format!("{} is not valid UTF-8", argument.to_string_lossy()),
        })
}
