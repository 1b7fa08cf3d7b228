//! In-memory port space for tests.
//!
//! Broker and clients share one namespace, as threads of one task would.
//! Rights are counted per name the way the kernel counts user references,
//! messages are rewritten into their delivered form, and every release is
//! recorded so tests can check that each right was given back exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rendezvous_wire::{Disposition, Envelope, PortName};

use super::{MessageBuffer, PortError, PortSpace, Receipt, Right};

const FIRST_NAME: u32 = 0x103;
const NAME_STRIDE: u32 = 0x100;

/// Port space that lives entirely in memory.
#[derive(Debug, Default)]
pub struct LoopbackPortSpace {
    state: Mutex<LoopbackState>,
    arrived: Condvar,
}

#[derive(Debug, Default)]
struct LoopbackState {
    next_name: u32,
    ports: HashMap<PortName, LoopbackPort>,
    releases: HashMap<(PortName, Right), usize>,
    invalid_releases: usize,
    sent: usize,
}

#[derive(Debug, Default)]
struct LoopbackPort {
    receive: bool,
    send: u32,
    send_once: u32,
    queue: VecDeque<Vec<u8>>,
}

impl LoopbackPort {
    const fn holds(&self, right: Right) -> bool {
        match right {
            Right::Receive => self.receive,
            Right::Send => self.send > 0,
            Right::SendOnce => self.send_once > 0,
        }
    }
}

impl LoopbackState {
    fn port(&self, name: PortName) -> Option<&LoopbackPort> {
        self.ports.get(&name)
    }

    fn holds(&self, name: PortName, right: Right) -> bool {
        self.port(name).is_some_and(|port| port.holds(right))
    }

    fn require(&self, name: PortName, right: Right) -> Result<(), PortError> {
        if self.holds(name, right) {
            Ok(())
        } else {
            Err(PortError::InvalidRight { name, right })
        }
    }

    /// Checks that `disposition` can be applied to `name` by the sender.
    fn check_disposition(&self, name: PortName, disposition: Disposition) -> Result<(), PortError> {
        match disposition {
            Disposition::MoveReceive | Disposition::MakeSend | Disposition::MakeSendOnce => {
                self.require(name, Right::Receive)
            }
            Disposition::MoveSend | Disposition::CopySend => self.require(name, Right::Send),
            Disposition::MoveSendOnce => self.require(name, Right::SendOnce),
        }
    }

    /// Net effect on this space of a right leaving and arriving again.
    fn carry(&mut self, name: PortName, disposition: Disposition) {
        let Some(port) = self.ports.get_mut(&name) else {
            return;
        };
        match disposition {
            Disposition::CopySend | Disposition::MakeSend => port.send += 1,
            Disposition::MakeSendOnce => port.send_once += 1,
            Disposition::MoveReceive | Disposition::MoveSend | Disposition::MoveSendOnce => {}
        }
    }

    /// Drops a right the kernel consumed while sending. Not a release by
    /// the holder, so it is not recorded.
    fn release_moved(&mut self, name: PortName, right: Right) {
        if let Some(port) = self.ports.get_mut(&name) {
            match right {
                Right::Receive => port.receive = false,
                Right::Send => port.send = port.send.saturating_sub(1),
                Right::SendOnce => port.send_once = port.send_once.saturating_sub(1),
            }
        }
    }

    fn release(&mut self, name: PortName, right: Right) -> Result<(), PortError> {
        let Some(port) = self.ports.get_mut(&name).filter(|port| port.holds(right)) else {
            self.invalid_releases += 1;
            return Err(PortError::InvalidRight { name, right });
        };
        match right {
            Right::Receive => {
                port.receive = false;
                port.queue.clear();
            }
            Right::Send => port.send -= 1,
            Right::SendOnce => port.send_once -= 1,
        }
        *self.releases.entry((name, right)).or_default() += 1;
        Ok(())
    }
}

impl LoopbackPortSpace {
    /// Builds an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times `right` under `name` was released.
    #[must_use]
    pub fn release_count(&self, name: PortName, right: Right) -> usize {
        self.lock()
            .releases
            .get(&(name, right))
            .copied()
            .unwrap_or_default()
    }

    /// Releases of rights that were not held.
    #[must_use]
    pub fn invalid_releases(&self) -> usize {
        self.lock().invalid_releases
    }

    /// Whether `name` currently holds `right`.
    #[must_use]
    pub fn holds(&self, name: PortName, right: Right) -> bool {
        self.lock().holds(name, right)
    }

    /// Send rights currently held under `name`.
    #[must_use]
    pub fn send_rights(&self, name: PortName) -> u32 {
        self.lock().port(name).map_or(0, |port| port.send)
    }

    /// Messages queued on `port`.
    #[must_use]
    pub fn pending(&self, port: PortName) -> usize {
        self.lock().port(port).map_or(0, |entry| entry.queue.len())
    }

    /// Messages accepted by [`PortSpace::send`].
    #[must_use]
    pub fn sent(&self) -> usize {
        self.lock().sent
    }
}

impl PortSpace for LoopbackPortSpace {
    fn allocate(&self) -> Result<PortName, PortError> {
        let mut state = self.lock();
        let raw = FIRST_NAME + state.next_name * NAME_STRIDE;
        state.next_name += 1;
        let name = PortName::new(raw);
        state.ports.insert(
            name,
            LoopbackPort {
                receive: true,
                send: 1,
                ..LoopbackPort::default()
            },
        );
        Ok(name)
    }

    fn release(&self, name: PortName, right: Right) -> Result<(), PortError> {
        self.lock().release(name, right)
    }

    fn receive(
        &self,
        port: PortName,
        buffer: &mut MessageBuffer,
        timeout: Option<Duration>,
    ) -> Result<Receipt, PortError> {
        let deadline = timeout.map(|wait| Instant::now() + wait);
        let mut state = self.lock();
        loop {
            state.require(port, Right::Receive)?;
            if let Some(message) = state
                .ports
                .get_mut(&port)
                .and_then(|entry| entry.queue.pop_front())
            {
                return buffer.load(&message).map(Receipt::Message);
            }
            match deadline {
                None => {
                    state = self
                        .arrived
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Receipt::TimedOut);
                    }
                    let (guard, _) = self
                        .arrived
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }

    fn send(&self, message: &[u8]) -> Result<(), PortError> {
        let envelope = Envelope::read(message)?;
        let header = envelope.header;
        let destination = header.remote_port;
        let destination_disposition = header.bits.remote().ok_or(PortError::InvalidRight {
            name: destination,
            right: Right::Send,
        })?;

        let mut state = self.lock();
        state.check_disposition(destination, destination_disposition)?;
        let reply = header
            .bits
            .local()
            .filter(|_| !header.local_port.is_null());
        if let Some(disposition) = reply {
            state.check_disposition(header.local_port, disposition)?;
        }
        for descriptor in &envelope.descriptors {
            state.check_disposition(descriptor.name, descriptor.disposition)?;
        }
        if !state.holds(destination, Right::Receive) {
            return Err(PortError::DeadName { name: destination });
        }

        // The destination right is consumed by the send; nothing arrives for it.
        match destination_disposition {
            Disposition::MoveSend => state.release_moved(destination, Right::Send),
            Disposition::MoveSendOnce => state.release_moved(destination, Right::SendOnce),
            _ => {}
        }
        if let Some(disposition) = reply {
            state.carry(header.local_port, disposition);
        }
        for descriptor in &envelope.descriptors {
            state.carry(descriptor.name, descriptor.disposition);
        }

        let reply_name = if reply.is_some() {
            header.local_port
        } else {
            PortName::NULL
        };
        let names: Vec<PortName> = envelope.descriptors.iter().map(|d| d.name).collect();
        let delivered = envelope.delivered(destination, reply_name, &names);
        let mut bytes = message
            .get(..header.declared_len())
            .unwrap_or(message)
            .to_vec();
        delivered.write_into(&mut bytes)?;
        if let Some(entry) = state.ports.get_mut(&destination) {
            entry.queue.push_back(bytes);
        }
        state.sent += 1;
        drop(state);
        self.arrived.notify_all();
        Ok(())
    }

    fn discard(&self, message: &[u8]) {
        let Ok(envelope) = Envelope::read(message) else {
            return;
        };
        let mut state = self.lock();
        let header = envelope.header;
        if let Some(disposition) = header.bits.remote().filter(|_| !header.remote_port.is_null())
        {
            let _ = state.release(header.remote_port, Right::arrived_as(disposition));
        }
        for descriptor in &envelope.descriptors {
            let _ = state.release(descriptor.name, Right::arrived_as(descriptor.disposition));
        }
    }
}
