//! Service-name registry.
//!
//! A fixed-capacity arena of `name → send right` entries. Slots are never
//! removed: clearing marks them inactive and later registrations reuse them,
//! so slot indices stay stable for the lifetime of the broker.

use std::sync::Arc;

use rendezvous_config::CheckInPolicy;
use thiserror::Error;
use tracing::info;

use crate::ports::{BorrowedCapabilityRef, OwnedCapability, PortError, PortSpace, Right};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name already has an active entry.
    #[error("service {name} is already checked in")]
    NameInUse {
        /// Service name.
        name: String,
    },
    /// Every slot holds an active entry.
    #[error("registry is full ({capacity} slots)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
    /// No active entry matches the name.
    #[error("service {name} is not registered")]
    UnknownService {
        /// Service name.
        name: String,
    },
    /// A port for check-in could not be allocated.
    #[error("failed to allocate a port for {name}: {source}")]
    Allocate {
        /// Service name.
        name: String,
        /// Transport failure.
        #[source]
        source: PortError,
    },
}

#[derive(Debug)]
struct Entry {
    name: String,
    capability: Option<OwnedCapability>,
    active: bool,
}

/// Registry of service names and the send rights stored under them.
#[derive(Debug)]
pub struct Registry {
    space: Arc<dyn PortSpace>,
    slots: Vec<Entry>,
    capacity: usize,
    check_in_policy: CheckInPolicy,
}

impl Registry {
    /// Builds an empty registry with room for `capacity` names. Slots are
    /// allocated as names arrive.
    #[must_use]
    pub fn new(space: Arc<dyn PortSpace>, capacity: usize, check_in_policy: CheckInPolicy) -> Self {
        Self {
            space,
            slots: Vec::new(),
            capacity,
            check_in_policy,
        }
    }

    /// Creates a port for `name`, keeps its send right and hands back the
    /// receive right for the caller to move to the client.
    pub fn check_in(
        &mut self,
        name: &str,
    ) -> Result<(OwnedCapability, BorrowedCapabilityRef<'_>), RegistryError> {
        let slot = match self.active_slot(name) {
            Some(_) if self.check_in_policy == CheckInPolicy::Reject => {
                return Err(RegistryError::NameInUse {
                    name: name.to_owned(),
                });
            }
            Some(slot) => slot,
            None => self.free_slot()?,
        };
        let port = self
            .space
            .allocate()
            .map_err(|source| RegistryError::Allocate {
                name: name.to_owned(),
                source,
            })?;
        let receive = OwnedCapability::adopt(Arc::clone(&self.space), port, Right::Receive);
        let send = OwnedCapability::adopt(Arc::clone(&self.space), port, Right::Send);
        self.store(slot, name, send);
        let stored = self.borrow_slot(slot, name)?;
        Ok((receive, stored))
    }

    /// Stores a send right supplied by a client. An active entry of the
    /// same name is replaced and its right released.
    pub fn register(
        &mut self,
        name: &str,
        capability: OwnedCapability,
    ) -> Result<usize, RegistryError> {
        let slot = match self.active_slot(name) {
            Some(slot) => slot,
            None => self.free_slot()?,
        };
        self.store(slot, name, capability);
        Ok(slot)
    }

    /// The send right stored under `name`.
    pub fn lookup(&self, name: &str) -> Result<BorrowedCapabilityRef<'_>, RegistryError> {
        let slot = self
            .active_slot(name)
            .ok_or_else(|| RegistryError::UnknownService {
                name: name.to_owned(),
            })?;
        self.borrow_slot(slot, name)
    }

    /// Whether `name` has an active entry.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.active_slot(name).is_some()
    }

    /// Number of active entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.active).count()
    }

    /// Whether no entry is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Names of the active entries, in slot order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.name.as_str())
    }

    /// Releases every stored right and marks all slots inactive.
    pub fn clear(&mut self) {
        for entry in &mut self.slots {
            entry.capability = None;
            entry.active = false;
        }
    }

    fn active_slot(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|entry| entry.active && entry.name == name)
    }

    fn free_slot(&self) -> Result<usize, RegistryError> {
        if let Some(slot) = self.slots.iter().position(|entry| !entry.active) {
            return Ok(slot);
        }
        if self.slots.len() < self.capacity {
            return Ok(self.slots.len());
        }
        Err(RegistryError::Full {
            capacity: self.capacity,
        })
    }

    fn store(&mut self, slot: usize, name: &str, capability: OwnedCapability) {
        let entry = Entry {
            name: name.to_owned(),
            capability: Some(capability),
            active: true,
        };
        match self.slots.get_mut(slot) {
            Some(existing) => *existing = entry,
            None => self.slots.push(entry),
        }
        info!(target: REGISTRY_TARGET, service = name, slot, "registered service {name} in slot {slot}");
    }

    fn borrow_slot(&self, slot: usize, name: &str) -> Result<BorrowedCapabilityRef<'_>, RegistryError> {
        self.slots
            .get(slot)
            .and_then(|entry| entry.capability.as_ref())
            .map(OwnedCapability::borrow)
            .ok_or_else(|| RegistryError::UnknownService {
                name: name.to_owned(),
            })
    }
}
