//! Structured health reporting for broker lifecycle events.

use std::sync::Arc;

use rendezvous_config::Config;
use rendezvous_wire::PortName;

use crate::bootstrap::BootstrapError;
use crate::broker::ShutdownReason;

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the rendezvous port is receiving requests.
    fn broker_listening(&self, port: PortName);

    /// Invoked when shutdown begins.
    fn broker_stopping(&self, reason: &ShutdownReason);

    /// Invoked after every capability has been released.
    fn broker_terminated(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn broker_listening(&self, port: PortName) {
        (**self).broker_listening(port);
    }

    fn broker_stopping(&self, reason: &ShutdownReason) {
        (**self).broker_stopping(reason);
    }

    fn broker_terminated(&self) {
        (**self).broker_terminated();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "rendezvousd::health",
            event = "bootstrap_starting",
            "starting broker bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "rendezvousd::health",
            event = "bootstrap_succeeded",
            transport = %config.transport(),
            registry_capacity = config.registry_capacity(),
            check_in_policy = %config.check_in_policy(),
            lookup_policy = %config.lookup_policy(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "broker bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "rendezvousd::health",
            event = "bootstrap_failed",
            error = %error,
            "broker bootstrap failed"
        );
    }

    fn broker_listening(&self, port: PortName) {
        tracing::info!(
            target: "rendezvousd::health",
            event = "broker_listening",
            port = %port,
            "rendezvous port ready"
        );
    }

    fn broker_stopping(&self, reason: &ShutdownReason) {
        tracing::info!(
            target: "rendezvousd::health",
            event = "broker_stopping",
            reason = %reason,
            "broker shutting down"
        );
    }

    fn broker_terminated(&self) {
        tracing::info!(
            target: "rendezvousd::health",
            event = "broker_terminated",
            "broker terminated"
        );
    }
}
