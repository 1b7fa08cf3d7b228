//! Brokers over the loopback port space and the clients that talk to them.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::Pid;
use rendezvous_config::{Config, TransportKind};
use rendezvous_wire::{PortName, Request, RequestBody, encode_request};

use super::events::ManualEvents;
use super::reporter::RecordingHealthReporter;
use crate::broker::Broker;
use crate::health::HealthReporter;
use crate::ports::loopback::LoopbackPortSpace;
use crate::ports::{MessageBuffer, PortSpace, Receipt};
use crate::process::{LaunchError, Transport};
use crate::supervisor::{
    ChildCommand, LaunchPlan, LaunchSequence, LaunchStage, SpawnError, Spawner, Supervisor,
};

const REPLY_WAIT: Duration = Duration::from_millis(200);

/// Spawner that starts real processes; the loopback space cannot hand them
/// a bootstrap port.
#[derive(Debug, Default)]
pub struct ShellSpawner;

impl Spawner for ShellSpawner {
    fn spawn(&self, command: &ChildCommand, _bootstrap: PortName) -> Result<Pid, SpawnError> {
        let child = Command::new(command.program().as_std_path())
            .args(command.arguments())
            .env_clear()
            .envs(command.environment())
            .spawn()
            .map_err(|source| SpawnError::ExecFailed {
                program: command.program().clone(),
                source,
            })?;
        Ok(Pid::from_raw(
            i32::try_from(child.id()).expect("pid fits in i32"),
        ))
    }
}

/// Transport that opens one shared loopback space whatever the
/// configuration asks for.
#[derive(Debug, Default, Clone)]
pub struct LoopbackTransport {
    space: Arc<LoopbackPortSpace>,
}

impl LoopbackTransport {
    /// The space handed to the broker.
    #[must_use]
    pub fn space(&self) -> Arc<LoopbackPortSpace> {
        Arc::clone(&self.space)
    }
}

impl Transport for LoopbackTransport {
    fn open(
        &self,
        _kind: TransportKind,
    ) -> Result<(Arc<dyn PortSpace>, Box<dyn Spawner>), LaunchError> {
        let space: Arc<dyn PortSpace> = self.space();
        Ok((space, Box::new(ShellSpawner)))
    }
}

/// A broker and the handles tests observe it through.
pub struct BrokerHarness {
    pub broker: Broker,
    pub space: Arc<LoopbackPortSpace>,
    pub events: ManualEvents,
    pub reporter: Arc<RecordingHealthReporter>,
}

/// Default configuration with a short shutdown grace period.
#[must_use]
pub fn loopback_config() -> Config {
    Config {
        shutdown_grace_ms: 2_000,
        ..Config::default()
    }
}

/// Builds a broker with no launch plan, spawning `command_line` as the
/// primary when given.
#[must_use]
pub fn broker_over(config: Config, command_line: Option<LaunchStage>) -> BrokerHarness {
    broker_with_spawner(
        config,
        Box::new(ShellSpawner),
        LaunchPlan::default(),
        command_line,
    )
}

/// Builds a broker with an explicit spawner and launch plan.
#[must_use]
pub fn broker_with_spawner(
    config: Config,
    spawner: Box<dyn Spawner>,
    plan: LaunchPlan,
    command_line: Option<LaunchStage>,
) -> BrokerHarness {
    let space = Arc::new(LoopbackPortSpace::new());
    let shared: Arc<dyn PortSpace> = space.clone();
    let events = ManualEvents::default();
    let reporter = Arc::new(RecordingHealthReporter::default());
    let health: Arc<dyn HealthReporter> = reporter.clone();
    let broker = Broker::new(
        shared,
        &config,
        Supervisor::new(spawner),
        LaunchSequence::new(plan, command_line),
        Box::new(events.clone()),
        health,
    );
    BrokerHarness {
        broker,
        space,
        events,
        reporter,
    }
}

/// A client sharing the loopback namespace with the broker.
pub struct ClientPort {
    space: Arc<LoopbackPortSpace>,
    broker: PortName,
}

impl ClientPort {
    #[must_use]
    pub fn new(space: &Arc<LoopbackPortSpace>, broker: PortName) -> Self {
        Self {
            space: Arc::clone(space),
            broker,
        }
    }

    /// Allocates a port to receive a reply on.
    #[must_use]
    pub fn fresh_reply_port(&self) -> PortName {
        self.space.allocate().expect("allocate reply port")
    }

    /// Sends `body` to the broker and returns the reply port.
    pub fn send(&self, body: RequestBody) -> PortName {
        let reply_port = self.fresh_reply_port();
        let request = Request::new(body, self.broker, reply_port);
        self.space
            .send(&encode_request(&request))
            .expect("send request");
        reply_port
    }

    /// Sends `body`, lets the broker handle it and returns the reply bytes.
    pub fn call(&self, broker: &mut Broker, body: RequestBody) -> Vec<u8> {
        let reply_port = self.send(body);
        broker.step().expect("broker step");
        self.try_reply(reply_port).expect("broker replied")
    }

    /// Returns the reply waiting on `reply_port`, if any.
    #[must_use]
    pub fn try_reply(&self, reply_port: PortName) -> Option<Vec<u8>> {
        let mut buffer = MessageBuffer::new();
        match self
            .space
            .receive(reply_port, &mut buffer, Some(REPLY_WAIT))
            .expect("receive reply")
        {
            Receipt::Message(len) => Some(buffer.message(len).to_vec()),
            _ => None,
        }
    }
}
