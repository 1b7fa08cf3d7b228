//! Routes decoded requests to registry operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rendezvous_config::{Config, DenyList, LookupPolicy};
use rendezvous_wire::{
    Disposition, PortDescriptor, Reply, ReplyBody, Request, RequestBody, Status,
};
use tracing::{debug, info, warn};

use super::pending::ParkedLookup;
use crate::ports::{OwnedCapability, PortSpace, Right};
use crate::registry::{Registry, RegistryError};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// What the loop does with a dispatched request.
#[derive(Debug)]
pub enum Action {
    /// Send `reply`. `moved` is the right the reply moves out of the broker;
    /// it is transferred once the send succeeds and released otherwise.
    Reply {
        /// The encoded reply.
        reply: Reply,
        /// Right carried with move semantics, if any.
        moved: Option<OwnedCapability>,
        /// Release the port rights the request body carried.
        release_carried: bool,
    },
    /// Hold the look-up until its name is registered or its wait elapses.
    Park(ParkedLookup),
    /// Send nothing and release the rights the message carries.
    Discard,
    /// Send nothing; the request's rights have been taken over or there
    /// were none.
    Consumed,
}

impl Action {
    fn reply(request: &Request, body: ReplyBody, moved: Option<OwnedCapability>) -> Self {
        match Reply::to(request, body) {
            Some(reply) => Self::Reply {
                reply,
                moved,
                release_carried: false,
            },
            None => {
                debug!(
                    target: DISPATCH_TARGET,
                    id = request.header.id,
                    "request carries no reply right; nothing sent"
                );
                Self::Consumed
            }
        }
    }

    fn status(request: &Request, status: Status) -> Self {
        Self::reply(request, ReplyBody::Status(status), None)
    }

    /// Answers a request the broker does not act on. Rights in its body
    /// are not adopted, so they are released once the reply is handled.
    fn refusal(request: &Request, status: Status) -> Self {
        match Self::status(request, status) {
            Self::Reply { reply, moved, .. } => Self::Reply {
                reply,
                moved,
                release_carried: true,
            },
            _ => Self::Discard,
        }
    }
}

/// Applies bootstrap requests to the registry.
#[derive(Debug)]
pub struct Dispatcher {
    space: Arc<dyn PortSpace>,
    denied: DenyList,
    lookup_policy: LookupPolicy,
    lookup_wait: Duration,
}

impl Dispatcher {
    /// Builds a dispatcher adopting carried rights into `space`.
    #[must_use]
    pub fn new(
        space: Arc<dyn PortSpace>,
        denied: DenyList,
        lookup_policy: LookupPolicy,
        lookup_wait: Duration,
    ) -> Self {
        Self {
            space,
            denied,
            lookup_policy,
            lookup_wait,
        }
    }

    /// Builds a dispatcher with the policies in `config`.
    #[must_use]
    pub fn from_config(space: Arc<dyn PortSpace>, config: &Config) -> Self {
        Self::new(
            space,
            config.denied_services().clone(),
            config.lookup_policy(),
            config.lookup_wait(),
        )
    }

    /// Handles one request received at `now`.
    pub fn dispatch(&self, registry: &mut Registry, request: Request, now: Instant) -> Action {
        let id = request.header.id;
        let service = request.body.name().map(|name| name.as_str().to_owned());
        debug!(
            target: DISPATCH_TARGET,
            id,
            service = service.as_deref().unwrap_or_default(),
            "dispatching request"
        );

        match &request.body {
            RequestBody::CheckIn { name } => self.check_in(registry, &request, name.as_str()),
            RequestBody::Register { name, port } | RequestBody::RegisterPort { name, port } => {
                self.register(registry, &request, name.as_str(), *port)
            }
            RequestBody::LookUp { name } | RequestBody::LookupPort { name } => {
                let name = name.as_str().to_owned();
                self.look_up(registry, request, name, now)
            }
            RequestBody::Parent | RequestBody::Subset => {
                Action::refusal(&request, Status::InvalidRight)
            }
            RequestBody::SpawnApp => Action::refusal(&request, Status::NotSupported),
            RequestBody::Wake => {
                debug!(target: DISPATCH_TARGET, "wake message");
                Action::Discard
            }
            RequestBody::Unknown { id } => {
                warn!(
                    target: DISPATCH_TARGET,
                    id = *id,
                    size = request.header.size,
                    "dropping message with unknown identifier"
                );
                Action::Discard
            }
        }
    }

    /// Answers a parked look-up: the port if its name is registered now,
    /// `UNKNOWN_SERVICE` otherwise.
    pub fn resolve(&self, registry: &Registry, parked: &ParkedLookup) -> Action {
        match registry.lookup(parked.name()) {
            Ok(stored) => {
                info!(
                    target: DISPATCH_TARGET,
                    service = parked.name(),
                    "answering parked look-up"
                );
                let descriptor = PortDescriptor::new(stored.name(), Disposition::CopySend);
                Action::reply(parked.request(), ReplyBody::Port(descriptor), None)
            }
            Err(_) => Self::expire(parked),
        }
    }

    /// Answers a parked look-up with `UNKNOWN_SERVICE`.
    pub fn expire(parked: &ParkedLookup) -> Action {
        info!(
            target: DISPATCH_TARGET,
            service = parked.name(),
            "parked look-up expired"
        );
        Action::status(parked.request(), Status::UnknownService)
    }

    fn check_in(&self, registry: &mut Registry, request: &Request, name: &str) -> Action {
        if request.reply_port().is_none() {
            warn!(
                target: DISPATCH_TARGET,
                service = name,
                "check-in without a reply right ignored"
            );
            return Action::Consumed;
        }
        match registry.check_in(name) {
            Ok((receive, _)) => {
                let descriptor = PortDescriptor::new(receive.name(), Disposition::MoveReceive);
                Action::reply(request, ReplyBody::Port(descriptor), Some(receive))
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    id = request.header.id,
                    service = name,
                    %error,
                    "check-in refused"
                );
                Action::status(request, status_for(&error))
            }
        }
    }

    fn register(
        &self,
        registry: &mut Registry,
        request: &Request,
        name: &str,
        port: PortDescriptor,
    ) -> Action {
        if port.name.is_null() {
            warn!(
                target: DISPATCH_TARGET,
                id = request.header.id,
                service = name,
                "register without a port right"
            );
            return Action::status(request, Status::InvalidRight);
        }
        let capability = OwnedCapability::adopt(
            Arc::clone(&self.space),
            port.name,
            Right::arrived_as(port.disposition),
        );
        if capability.right() == Right::Receive {
            warn!(
                target: DISPATCH_TARGET,
                id = request.header.id,
                service = name,
                "register carried a receive right; releasing it"
            );
            return Action::status(request, Status::InvalidRight);
        }
        match registry.register(name, capability) {
            Ok(_) => Action::status(request, Status::Success),
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    id = request.header.id,
                    service = name,
                    %error,
                    "register refused"
                );
                Action::status(request, status_for(&error))
            }
        }
    }

    fn look_up(&self, registry: &Registry, request: Request, name: String, now: Instant) -> Action {
        if self.denied.denies(&name) {
            info!(
                target: DISPATCH_TARGET,
                service = name.as_str(),
                "look-up of denied service"
            );
            return Action::status(&request, Status::UnknownService);
        }
        if let Ok(stored) = registry.lookup(&name) {
            let descriptor = PortDescriptor::new(stored.name(), Disposition::CopySend);
            return Action::reply(&request, ReplyBody::Port(descriptor), None);
        }
        if self.lookup_policy == LookupPolicy::Wait && request.reply_port().is_some() {
            debug!(
                target: DISPATCH_TARGET,
                service = name.as_str(),
                wait_ms = self.lookup_wait.as_millis(),
                "parking look-up"
            );
            return Action::Park(ParkedLookup::new(request, name, now + self.lookup_wait));
        }
        debug!(
            target: DISPATCH_TARGET,
            service = name.as_str(),
            "look-up of unknown service"
        );
        Action::status(&request, Status::UnknownService)
    }
}

const fn status_for(error: &RegistryError) -> Status {
    match error {
        RegistryError::NameInUse { .. } => Status::NameInUse,
        RegistryError::Full { .. } | RegistryError::Allocate { .. } => Status::NoMemory,
        RegistryError::UnknownService { .. } => Status::UnknownService,
    }
}

#[cfg(test)]
mod tests;
