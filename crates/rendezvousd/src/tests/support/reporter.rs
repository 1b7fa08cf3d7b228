//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use rendezvous_config::Config;
use rendezvous_wire::PortName;

use crate::bootstrap::BootstrapError;
use crate::broker::ShutdownReason;
use crate::health::HealthReporter;

/// Lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    Listening(PortName),
    Stopping(ShutdownReason),
    Terminated,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn broker_listening(&self, port: PortName) {
        self.record(HealthEvent::Listening(port));
    }

    fn broker_stopping(&self, reason: &ShutdownReason) {
        self.record(HealthEvent::Stopping(*reason));
    }

    fn broker_terminated(&self) {
        self.record(HealthEvent::Terminated);
    }
}
