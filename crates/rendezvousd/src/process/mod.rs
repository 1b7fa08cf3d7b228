//! Process-level launch: command line, runtime files and transport choice.

mod cli;
mod errors;
mod files;
mod guard;
pub(crate) mod launch;

pub use cli::CommandLine;
pub use errors::LaunchError;
pub use launch::{SystemTransport, Transport, run_broker};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
