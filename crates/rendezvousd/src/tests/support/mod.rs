//! Test harness utilities shared by the broker suites.

mod broker;
mod events;
mod reporter;

pub use broker::{
    BrokerHarness, ClientPort, LoopbackTransport, ShellSpawner, broker_over, broker_with_spawner, loopback_config,
};
pub use events::ManualEvents;
pub use reporter::{HealthEvent, RecordingHealthReporter};
