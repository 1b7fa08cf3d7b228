//! The rendezvous loop.
//!
//! A [`Broker`] owns the rendezvous port, the registry, the parked look-ups
//! and the supervisor, and drives them from a single thread:
//!
//! ```text
//! Init --start--> Listening --primary exit / signal--> ShuttingDown --> Terminated
//! ```
//!
//! Each [`Broker::step`] drains events from the signal listener, reaps
//! children, advances the launch plan, answers parked look-ups whose name
//! appeared or whose wait elapsed, and then blocks on the port until the
//! earliest of those deadlines. A received request is decoded, dispatched and
//! answered before the next one is read. Messages that fail to decode are
//! logged and dropped; no client message ends the loop.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use rendezvous_config::Config;
use rendezvous_wire::{Envelope, PortName, decode_request, encode_reply};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::{Action, Dispatcher, PendingLookups};
use crate::health::HealthReporter;
use crate::ports::{MessageBuffer, OwnedCapability, PortError, PortSpace, Receipt, Right};
use crate::registry::Registry;
use crate::supervisor::{ChildStatus, ExitDisposition, LaunchSequence, SpawnError, Supervisor};

mod events;

pub use self::events::{BrokerEvent, EventSource, SignalEvents, Waker};

pub(crate) const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

/// Longest single wait on the port when no deadline is pending.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Lifecycle of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Constructed; the port does not exist yet.
    Init,
    /// Receiving requests.
    Listening,
    /// Releasing children, parked look-ups and capabilities.
    ShuttingDown,
    /// Everything has been released.
    Terminated,
}

/// Why the broker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The primary child exited.
    PrimaryExited(ChildStatus),
    /// A termination signal arrived.
    Signal(i32),
    /// The primary child could not be started.
    LaunchFailed,
    /// The rendezvous port stopped delivering messages.
    ReceiveFailed,
    /// The owner asked for shutdown.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryExited(status) => write!(f, "primary child exited with {status}"),
            Self::Signal(signal) => write!(f, "received signal {signal}"),
            Self::LaunchFailed => f.write_str("primary child failed to start"),
            Self::ReceiveFailed => f.write_str("rendezvous port failed"),
            Self::Requested => f.write_str("shutdown requested"),
        }
    }
}

/// Errors that end the loop.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The rendezvous port could not be allocated.
    #[error("failed to allocate the rendezvous port: {source}")]
    Allocate {
        /// Transport error.
        #[source]
        source: PortError,
    },
    /// The signal listener could not be installed.
    #[error("failed to install signal handlers: {source}")]
    Events {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The primary child could not be started.
    #[error("failed to start the primary child: {source}")]
    Spawn {
        /// Spawn failure.
        #[source]
        source: SpawnError,
    },
    /// Receiving on the rendezvous port failed.
    #[error("failed to receive on the rendezvous port: {source}")]
    Receive {
        /// Transport error.
        #[source]
        source: PortError,
    },
}

/// The rights the broker holds on its own port.
#[derive(Debug)]
struct RendezvousPort {
    receive: OwnedCapability,
    /// Copied to children and used by the waker.
    _send: OwnedCapability,
}

impl RendezvousPort {
    const fn name(&self) -> PortName {
        self.receive.name()
    }
}

/// Single-threaded rendezvous broker.
pub struct Broker {
    space: Arc<dyn PortSpace>,
    state: BrokerState,
    port: Option<RendezvousPort>,
    buffer: MessageBuffer,
    registry: Registry,
    dispatcher: Dispatcher,
    pending: PendingLookups,
    supervisor: Supervisor,
    launch: LaunchSequence,
    events: Box<dyn EventSource>,
    event_sender: Sender<BrokerEvent>,
    event_receiver: Receiver<BrokerEvent>,
    shutdown_grace: Duration,
    reporter: Arc<dyn HealthReporter>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("state", &self.state)
            .field("port", &self.port)
            .field("registry", &self.registry)
            .field("pending", &self.pending.len())
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Assembles a broker over `space` with the policies in `config`.
    #[must_use]
    pub fn new(
        space: Arc<dyn PortSpace>,
        config: &Config,
        supervisor: Supervisor,
        launch: LaunchSequence,
        events: Box<dyn EventSource>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        let (event_sender, event_receiver) = mpsc::channel();
        Self {
            registry: Registry::new(
                Arc::clone(&space),
                config.registry_capacity(),
                config.check_in_policy(),
            ),
            dispatcher: Dispatcher::from_config(Arc::clone(&space), config),
            space,
            state: BrokerState::Init,
            port: None,
            buffer: MessageBuffer::new(),
            pending: PendingLookups::new(),
            supervisor,
            launch,
            events,
            event_sender,
            event_receiver,
            shutdown_grace: config.shutdown_grace(),
            reporter,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BrokerState {
        self.state
    }

    /// Name of the rendezvous port while the broker holds it.
    #[must_use]
    pub fn port(&self) -> Option<PortName> {
        self.port.as_ref().map(RendezvousPort::name)
    }

    /// The service registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The child supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Allocates the rendezvous port, installs the signal listener and
    /// spawns the launch plan up to its first readiness wait.
    ///
    /// Calling it outside [`BrokerState::Init`] returns the current port.
    pub fn start(&mut self) -> Result<PortName, BrokerError> {
        if let Some(port) = self.port() {
            return Ok(port);
        }
        if self.state != BrokerState::Init {
            return Err(BrokerError::Allocate {
                source: PortError::Allocate {
                    message: "broker has already shut down".to_owned(),
                },
            });
        }

        let name = self
            .space
            .allocate()
            .map_err(|source| BrokerError::Allocate { source })?;
        self.port = Some(RendezvousPort {
            receive: OwnedCapability::adopt(Arc::clone(&self.space), name, Right::Receive),
            _send: OwnedCapability::adopt(Arc::clone(&self.space), name, Right::Send),
        });
        info!(target: BROKER_TARGET, port = %name, "rendezvous port allocated");
        self.supervisor.install_bootstrap(name);

        let waker = Waker::new(Arc::clone(&self.space), name);
        if let Err(source) = self.events.start(self.event_sender.clone(), waker) {
            self.release_port();
            self.state = BrokerState::Terminated;
            return Err(BrokerError::Events { source });
        }

        self.state = BrokerState::Listening;
        self.reporter.broker_listening(name);
        self.advance_launch(Instant::now())?;
        Ok(name)
    }

    /// Runs the loop until the broker terminates.
    pub fn run(&mut self) -> Result<ShutdownReason, BrokerError> {
        self.start()?;
        let mut reason = ShutdownReason::Requested;
        while self.state == BrokerState::Listening {
            if let Some(stopped) = self.step()? {
                reason = stopped;
            }
        }
        Ok(reason)
    }

    /// Performs one iteration of the loop: events, launch, parked look-ups
    /// and at most one request.
    ///
    /// Returns the shutdown reason when this iteration stopped the broker.
    pub fn step(&mut self) -> Result<Option<ShutdownReason>, BrokerError> {
        if self.state != BrokerState::Listening {
            return Ok(None);
        }
        if let Some(reason) = self.handle_events() {
            self.shutdown(reason);
            return Ok(Some(reason));
        }
        let now = Instant::now();
        self.advance_launch(now)?;
        self.answer_parked(now);

        let Some(port) = self.port() else {
            return Ok(None);
        };
        let timeout = self.next_wait(Instant::now());
        match self.space.receive(port, &mut self.buffer, Some(timeout)) {
            Ok(Receipt::Message(len)) => self.handle_message(len),
            Ok(Receipt::TimedOut | Receipt::Interrupted) => {}
            Ok(Receipt::Dropped) => {
                warn!(
                    target: BROKER_TARGET,
                    "dropped a message larger than the receive buffer"
                );
            }
            Err(source) => {
                self.shutdown(ShutdownReason::ReceiveFailed);
                return Err(BrokerError::Receive { source });
            }
        }
        Ok(None)
    }

    /// Answers parked look-ups, stops every child, empties the registry and
    /// releases the rendezvous port. Only the first call does anything.
    pub fn shutdown(&mut self, reason: ShutdownReason) {
        if matches!(
            self.state,
            BrokerState::ShuttingDown | BrokerState::Terminated
        ) {
            debug!(target: BROKER_TARGET, %reason, "shutdown already handled");
            return;
        }
        self.state = BrokerState::ShuttingDown;
        info!(target: BROKER_TARGET, %reason, "shutting down");
        self.reporter.broker_stopping(&reason);

        for parked in self.pending.drain() {
            let action = Dispatcher::expire(&parked);
            self.perform(action, None);
        }
        for exit in self.supervisor.terminate_all(self.shutdown_grace) {
            debug!(
                target: BROKER_TARGET,
                pid = exit.pid.as_raw(),
                status = %exit.status,
                "child stopped"
            );
        }
        self.events.stop();
        self.registry.clear();
        self.release_port();
        self.launch.remove_artefacts();

        self.state = BrokerState::Terminated;
        info!(target: BROKER_TARGET, "broker terminated");
        self.reporter.broker_terminated();
    }

    fn release_port(&mut self) {
        if let Some(port) = self.port.take() {
            debug!(target: BROKER_TARGET, port = %port.name(), "releasing rendezvous port");
        }
    }

    fn handle_events(&mut self) -> Option<ShutdownReason> {
        let mut stop = None;
        while let Ok(event) = self.event_receiver.try_recv() {
            if let BrokerEvent::Terminate { signal } = event {
                stop.get_or_insert(ShutdownReason::Signal(signal));
            }
        }
        if stop.is_some() {
            return stop;
        }
        // Tracked children are polled on every iteration; `ChildExited` only
        // cuts the wait short.
        for exit in self.supervisor.reap() {
            if self.supervisor.on_child_exit(&exit) == ExitDisposition::Shutdown {
                stop.get_or_insert(ShutdownReason::PrimaryExited(exit.status));
            }
        }
        stop
    }

    fn advance_launch(&mut self, now: Instant) -> Result<(), BrokerError> {
        if self.launch.is_complete() {
            return Ok(());
        }
        if let Err(source) = self.launch.advance(&mut self.supervisor, &self.registry, now) {
            self.shutdown(ShutdownReason::LaunchFailed);
            return Err(BrokerError::Spawn { source });
        }
        Ok(())
    }

    fn answer_parked(&mut self, now: Instant) {
        for parked in self.pending.take_due(&self.registry, now) {
            let action = self.dispatcher.resolve(&self.registry, &parked);
            self.perform(action, None);
        }
    }

    fn next_wait(&self, now: Instant) -> Duration {
        [self.pending.next_deadline(), self.launch.next_deadline()]
            .into_iter()
            .flatten()
            .min()
            .map_or(IDLE_WAIT, |deadline| {
                deadline.saturating_duration_since(now).min(IDLE_WAIT)
            })
    }

    fn handle_message(&mut self, len: usize) {
        let message = self.buffer.message(len).to_vec();
        match decode_request(&message) {
            Ok(request) => {
                let action = self
                    .dispatcher
                    .dispatch(&mut self.registry, request, Instant::now());
                self.perform(action, Some(&message));
            }
            Err(error) => {
                let declared = Envelope::read(&message).map_or(0, |envelope| envelope.header.size);
                warn!(
                    target: BROKER_TARGET,
                    id = error.id(),
                    declared_size = declared,
                    len,
                    %error,
                    "dropping malformed message"
                );
                self.space.discard(&message);
            }
        }
    }

    fn release_carried(&self, message: &[u8]) {
        let Ok(envelope) = Envelope::read(message) else {
            return;
        };
        for descriptor in &envelope.descriptors {
            let right = Right::arrived_as(descriptor.disposition);
            if let Err(error) = self.space.release(descriptor.name, right) {
                debug!(
                    target: BROKER_TARGET,
                    port = %descriptor.name,
                    %error,
                    "carried right already gone"
                );
            }
        }
    }

    fn perform(&mut self, action: Action, message: Option<&[u8]>) {
        match action {
            Action::Reply {
                reply,
                moved,
                release_carried,
            } => {
                match self.space.send(&encode_reply(&reply)) {
                    Ok(()) => {
                        if let Some(moved) = moved {
                            moved.transfer();
                        }
                    }
                    Err(error) => {
                        warn!(
                            target: BROKER_TARGET,
                            id = reply.id,
                            destination = %reply.destination,
                            %error,
                            "failed to send reply"
                        );
                        let right = Right::arrived_as(reply.disposition);
                        if let Err(error) = self.space.release(reply.destination, right) {
                            debug!(target: BROKER_TARGET, %error, "reply right already gone");
                        }
                    }
                }
                if release_carried {
                    if let Some(message) = message {
                        self.release_carried(message);
                    }
                }
            }
            Action::Park(parked) => {
                debug!(
                    target: BROKER_TARGET,
                    service = parked.name(),
                    "parking look-up"
                );
                self.pending.park(parked);
            }
            Action::Discard => {
                if let Some(message) = message {
                    self.space.discard(message);
                }
            }
            Action::Consumed => {}
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if self.state == BrokerState::Listening {
            self.shutdown(ShutdownReason::Requested);
        }
    }
}
