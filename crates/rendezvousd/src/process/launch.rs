//! Launch sequencing around the broker loop.

use std::env;
use std::ffi::OsString;
use std::sync::Arc;

use rendezvous_config::{Config, RuntimePaths, TransportKind};
use tracing::info;

use super::PROCESS_TARGET;
use super::cli::CommandLine;
use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::broker::{Broker, EventSource, ShutdownReason, SignalEvents};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::ports::PortSpace;
use crate::supervisor::{LaunchPlan, LaunchSequence, LaunchStage, Spawner, Supervisor};

/// Opens the port space and spawner for a transport.
pub trait Transport: Send {
    /// Returns the broker's port space and a spawner handing children
    /// rights from it.
    fn open(&self, kind: TransportKind)
    -> Result<(Arc<dyn PortSpace>, Box<dyn Spawner>), LaunchError>;
}

/// The host's transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransport;

impl Transport for SystemTransport {
    fn open(
        &self,
        kind: TransportKind,
    ) -> Result<(Arc<dyn PortSpace>, Box<dyn Spawner>), LaunchError> {
        match kind {
            TransportKind::Unix => {
                let space = Arc::new(crate::ports::unix::UnixPortSpace::new());
                let spawner = crate::supervisor::UnixSpawner::new(Arc::clone(&space));
                Ok((space, Box::new(spawner)))
            }
            TransportKind::Mach => open_mach(),
        }
    }
}

#[cfg(target_os = "macos")]
fn open_mach() -> Result<(Arc<dyn PortSpace>, Box<dyn Spawner>), LaunchError> {
    let space = Arc::new(crate::ports::mach::MachPortSpace::new());
    Ok((space, Box::new(crate::supervisor::MachSpawner)))
}

#[cfg(not(target_os = "macos"))]
fn open_mach() -> Result<(Arc<dyn PortSpace>, Box<dyn Spawner>), LaunchError> {
    Err(LaunchError::UnsupportedTransport {
        kind: TransportKind::Mach,
    })
}

/// Collaborators the launch sequence runs with.
pub(crate) struct LaunchDeps<L, T> {
    pub(crate) loader: L,
    pub(crate) transport: T,
    pub(crate) events: Box<dyn EventSource>,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Runs the broker with the process command line and the host transports.
pub fn run_broker() -> Result<ShutdownReason, LaunchError> {
    let args: Vec<OsString> = env::args_os().collect();
    let command_line = CommandLine::parse(&args)?;
    let deps = LaunchDeps {
        loader: SystemConfigLoader::new(command_line.config_arguments().to_vec()),
        transport: SystemTransport,
        events: Box::new(SignalEvents::new()),
        reporter: Arc::new(StructuredHealthReporter::new()),
    };
    run_broker_with(deps, command_line.primary_stage())
}

/// Runs the broker with injected collaborators until it terminates.
pub(crate) fn run_broker_with<L, T>(
    deps: LaunchDeps<L, T>,
    primary: Option<LaunchStage>,
) -> Result<ShutdownReason, LaunchError>
where
    L: ConfigLoader,
    T: Transport,
{
    let LaunchDeps {
        loader,
        transport,
        events,
        reporter,
    } = deps;

    let config = bootstrap_with(&loader, reporter.as_ref())?.into_config();
    info!(
        target: PROCESS_TARGET,
        transport = %config.transport(),
        runtime_dir = %config.runtime_dir(),
        "starting rendezvous broker"
    );
    let mut guard = ProcessGuard::acquire(RuntimePaths::from_config(&config)?)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let plan = load_plan(&config)?;
    let (space, spawner) = transport.open(config.transport())?;
    let mut broker = Broker::new(
        space,
        &config,
        Supervisor::new(spawner),
        LaunchSequence::new(plan, primary),
        events,
        reporter,
    );

    let port = broker.start()?;
    guard.set_port(port);
    guard.write_health(HealthState::Ready)?;

    let outcome = broker.run();
    guard.write_health(HealthState::Stopping)?;
    let reason = outcome?;
    info!(
        target: PROCESS_TARGET,
        %reason,
        "shutdown sequence completed"
    );
    Ok(reason)
}

fn load_plan(config: &Config) -> Result<LaunchPlan, LaunchError> {
    match config.launch_plan() {
        Some(path) => Ok(LaunchPlan::load(path)?),
        None => Ok(LaunchPlan::default()),
    }
}
