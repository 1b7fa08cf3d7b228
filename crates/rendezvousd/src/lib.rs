//! Rendezvous broker for the bootstrap protocol.
//!
//! The broker stands in for the host's service directory in a process tree
//! it launches. Children receive the broker's rendezvous port as their
//! bootstrap port and keep speaking the unmodified bootstrap protocol:
//! services check in or register a port under a name, and clients look the
//! name up to obtain a send right to that port.
//!
//! The crate is organised bottom-up:
//!
//! - [`ports`] moves capabilities: Mach ports on macOS, descriptor-passing
//!   datagram sockets elsewhere, and an in-memory space for tests.
//! - [`registry`] maps service names to the rights the broker holds.
//! - [`dispatch`] turns decoded requests into registry operations and
//!   replies.
//! - [`supervisor`] spawns and reaps children and walks the launch plan.
//! - [`broker`] runs the single-threaded loop and the shutdown sequence.
//!
//! Process-level concerns (configuration, telemetry, runtime files and the
//! command line) live in [`run_broker`] and its helpers.

mod bootstrap;
pub mod broker;
pub mod dispatch;
mod health;
pub mod ports;
mod process;
pub mod registry;
pub mod supervisor;
mod telemetry;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use broker::{Broker, BrokerError, BrokerState, ShutdownReason};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{CommandLine, LaunchError, SystemTransport, Transport, run_broker};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
