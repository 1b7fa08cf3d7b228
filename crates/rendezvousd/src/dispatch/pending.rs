//! Look-ups held until their service appears.

use std::time::Instant;

use rendezvous_wire::Request;

use crate::registry::Registry;

/// A look-up waiting for its name to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedLookup {
    request: Request,
    name: String,
    deadline: Instant,
}

impl ParkedLookup {
    /// Parks `request` for `name` until `deadline`.
    #[must_use]
    pub const fn new(request: Request, name: String, deadline: Instant) -> Self {
        Self {
            request,
            name,
            deadline,
        }
    }

    /// The original request, still holding its reply right.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Service name being waited for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instant after which the look-up is answered `UNKNOWN_SERVICE`.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Parked look-ups in arrival order.
#[derive(Debug, Default)]
pub struct PendingLookups {
    parked: Vec<ParkedLookup>,
}

impl PendingLookups {
    /// Builds an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds a look-up.
    pub fn park(&mut self, lookup: ParkedLookup) {
        self.parked.push(lookup);
    }

    /// Earliest deadline among parked look-ups.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.parked.iter().map(ParkedLookup::deadline).min()
    }

    /// Removes the look-ups that can be answered now: their name is
    /// registered or their deadline has passed.
    pub fn take_due(&mut self, registry: &Registry, now: Instant) -> Vec<ParkedLookup> {
        let (due, waiting) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|lookup| lookup.deadline <= now || registry.contains(&lookup.name));
        self.parked = waiting;
        due
    }

    /// Removes every parked look-up.
    pub fn drain(&mut self) -> Vec<ParkedLookup> {
        std::mem::take(&mut self.parked)
    }

    /// Number of parked look-ups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parked.len()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
