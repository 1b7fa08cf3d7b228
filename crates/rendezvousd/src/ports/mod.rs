//! Capability transport behind the broker loop.
//!
//! A [`PortSpace`] is the broker's view of the kernel's port namespace: it
//! allocates ports, moves rights in and out of messages and releases them.
//! Rights the broker holds are wrapped in [`OwnedCapability`], which
//! releases its right exactly once when dropped, or not at all once the
//! right has been moved into a sent message.
//!
//! Three spaces exist:
//!
//! - [`mach::MachPortSpace`] on macOS, backed by `mach_msg`.
//! - [`unix::UnixPortSpace`] on other Unix hosts, where a port is a datagram
//!   socket pair and rights travel as `SCM_RIGHTS` descriptors.
//! - [`loopback::LoopbackPortSpace`] for tests, entirely in memory.

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rendezvous_wire::{
    Disposition, MessageId, PortName, RECEIVE_BUFFER_SIZE, Request, RequestBody, encode_request,
};
use thiserror::Error;
use tracing::warn;

#[cfg(any(test, feature = "test-support"))]
pub mod loopback;
#[cfg(target_os = "macos")]
pub mod mach;
#[cfg(unix)]
pub mod unix;

const PORTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ports");

/// Kind of right held under a port name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Right {
    /// The single receive right of a port.
    Receive,
    /// A duplicable send right.
    Send,
    /// A send-once right, consumed by the message sent with it.
    SendOnce,
}

impl Right {
    /// Right the receiver holds for a descriptor or reply port that arrived
    /// with `disposition`.
    #[must_use]
    pub const fn arrived_as(disposition: Disposition) -> Self {
        match disposition.on_receipt() {
            Disposition::MoveReceive => Self::Receive,
            Disposition::MoveSendOnce => Self::SendOnce,
            _ => Self::Send,
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Receive => "receive",
            Self::Send => "send",
            Self::SendOnce => "send-once",
        };
        f.write_str(label)
    }
}

/// Outcome of a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// A message of the given length was written to the buffer.
    Message(usize),
    /// The timeout elapsed without a message.
    TimedOut,
    /// The wait was interrupted; the caller should re-check its state.
    Interrupted,
    /// A message arrived too large for the buffer. The transport dropped
    /// it and released its rights.
    Dropped,
}

/// Errors raised by a port space.
#[derive(Debug, Error)]
pub enum PortError {
    /// A port could not be allocated.
    #[error("failed to allocate port: {message}")]
    Allocate {
        /// Transport-specific description.
        message: String,
    },
    /// The name does not hold the right an operation needs.
    #[error("port {name} does not hold a {right} right")]
    InvalidRight {
        /// Port name.
        name: PortName,
        /// Right that was required.
        right: Right,
    },
    /// The destination's receive right is gone.
    #[error("port {name} is dead")]
    DeadName {
        /// Destination name.
        name: PortName,
    },
    /// The message could not be read for its rights.
    #[error("message rejected by the transport: {source}")]
    Malformed {
        /// Envelope decoding error.
        #[source]
        source: rendezvous_wire::CodecError,
    },
    /// The message carries more than the transport accepts.
    #[error("message of {size} bytes exceeds the transport limit")]
    TooLarge {
        /// Message size in bytes.
        size: usize,
    },
    /// The kernel rejected a send.
    #[error("send failed with {code:#x}")]
    Send {
        /// Kernel return code.
        code: i32,
    },
    /// The kernel rejected a receive.
    #[error("receive failed with {code:#x}")]
    Receive {
        /// Kernel return code.
        code: i32,
    },
    /// Socket-level failure.
    #[error("transport I/O failed: {source}")]
    Io {
        /// Underlying IO error.
        #[from]
        source: io::Error,
    },
}

impl From<rendezvous_wire::CodecError> for PortError {
    fn from(source: rendezvous_wire::CodecError) -> Self {
        Self::Malformed { source }
    }
}

/// Receive buffer aligned for the kernel message header.
#[derive(Clone)]
#[repr(C, align(8))]
pub struct MessageBuffer {
    bytes: [u8; RECEIVE_BUFFER_SIZE],
}

impl MessageBuffer {
    /// Builds a zeroed buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [0; RECEIVE_BUFFER_SIZE],
        }
    }

    /// The whole buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The whole buffer, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The first `len` bytes, clamped to the buffer.
    #[must_use]
    pub fn message(&self, len: usize) -> &[u8] {
        let end = len.min(self.bytes.len());
        self.bytes.get(..end).unwrap_or_default()
    }

    /// Copies `message` into the front of the buffer.
    pub fn load(&mut self, message: &[u8]) -> Result<usize, PortError> {
        let target = self
            .bytes
            .get_mut(..message.len())
            .ok_or(PortError::TooLarge {
                size: message.len(),
            })?;
        target.copy_from_slice(message);
        Ok(message.len())
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("capacity", &self.bytes.len())
            .finish()
    }
}

/// The broker's port namespace.
///
/// Implementations are shared between the loop thread and the signal
/// listener, which only ever sends the wake message.
pub trait PortSpace: Send + Sync + fmt::Debug {
    /// Allocates a port. The returned name holds its receive right and one
    /// send right.
    fn allocate(&self) -> Result<PortName, PortError>;

    /// Releases one right held under `name`.
    fn release(&self, name: PortName, right: Right) -> Result<(), PortError>;

    /// Waits up to `timeout` (forever when `None`) for a message on `port`.
    ///
    /// The delivered message names rights in this space: the reply right in
    /// the header's remote port and carried rights in its descriptors.
    fn receive(
        &self,
        port: PortName,
        buffer: &mut MessageBuffer,
        timeout: Option<Duration>,
    ) -> Result<Receipt, PortError>;

    /// Sends `message` to the header's remote port, moving or copying the
    /// rights its header and descriptors name. On success every moved right
    /// has left this space.
    fn send(&self, message: &[u8]) -> Result<(), PortError>;

    /// Releases the rights a received message carries without answering it.
    fn discard(&self, message: &[u8]);
}

/// A right the broker holds and must release.
///
/// Dropping the capability releases the right. [`OwnedCapability::transfer`]
/// marks it as moved into a sent message, after which nothing is released.
pub struct OwnedCapability {
    name: PortName,
    right: Right,
    space: Arc<dyn PortSpace>,
}

impl OwnedCapability {
    /// Takes ownership of `right` under `name`.
    #[must_use]
    pub fn adopt(space: Arc<dyn PortSpace>, name: PortName, right: Right) -> Self {
        Self { name, right, space }
    }

    /// Port name in the broker's space.
    #[must_use]
    pub const fn name(&self) -> PortName {
        self.name
    }

    /// Right held.
    #[must_use]
    pub const fn right(&self) -> Right {
        self.right
    }

    /// Borrows the capability for a copy-send reply.
    #[must_use]
    pub const fn borrow(&self) -> BorrowedCapabilityRef<'_> {
        BorrowedCapabilityRef {
            name: self.name,
            right: self.right,
            _owner: PhantomData,
        }
    }

    /// Records that the right left the broker inside a sent message.
    pub fn transfer(mut self) {
        self.name = PortName::NULL;
    }
}

impl Drop for OwnedCapability {
    fn drop(&mut self) {
        if self.name.is_null() {
            return;
        }
        if let Err(error) = self.space.release(self.name, self.right) {
            warn!(
                target: PORTS_TARGET,
                port = %self.name,
                right = %self.right,
                error = %error,
                "failed to release right"
            );
        }
    }
}

impl fmt::Debug for OwnedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedCapability")
            .field("name", &self.name)
            .field("right", &self.right)
            .finish_non_exhaustive()
    }
}

/// A view of a capability the registry still owns. Dropping it releases
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowedCapabilityRef<'a> {
    name: PortName,
    right: Right,
    _owner: PhantomData<&'a OwnedCapability>,
}

impl BorrowedCapabilityRef<'_> {
    /// Port name in the broker's space.
    #[must_use]
    pub const fn name(&self) -> PortName {
        self.name
    }

    /// Right held by the owner.
    #[must_use]
    pub const fn right(&self) -> Right {
        self.right
    }
}

/// Builds the header-only message that wakes the loop blocked on `port`.
#[must_use]
pub fn wake_message(port: PortName) -> Vec<u8> {
    encode_request(&Request::new(RequestBody::Wake, port, PortName::NULL))
}

/// Sends the wake message to `port` through `space`.
pub fn wake(space: &dyn PortSpace, port: PortName) -> Result<(), PortError> {
    space.send(&wake_message(port))
}

/// Whether a received message is the broker's own wake-up.
#[must_use]
pub fn is_wake(id: i32) -> bool {
    MessageId::from_raw(id) == Some(MessageId::Wake)
}

#[cfg(test)]
mod tests {
    use rendezvous_wire::{Envelope, HEADER_SIZE};
    use rstest::rstest;

    use super::loopback::LoopbackPortSpace;
    use super::*;

    #[rstest]
    #[case(Disposition::MakeSendOnce, Right::SendOnce)]
    #[case(Disposition::CopySend, Right::Send)]
    #[case(Disposition::MoveReceive, Right::Receive)]
    fn arrived_rights_follow_the_disposition(#[case] disposition: Disposition, #[case] right: Right) {
        assert_eq!(Right::arrived_as(disposition), right);
    }

    #[test]
    fn dropping_an_owned_capability_releases_it_once() {
        let space = Arc::new(LoopbackPortSpace::new());
        let name = space.allocate().expect("allocate");
        let shared: Arc<dyn PortSpace> = space.clone();
        let capability = OwnedCapability::adopt(shared, name, Right::Send);
        let borrowed = capability.borrow();
        assert_eq!(borrowed.name(), name);
        drop(capability);

        assert_eq!(space.release_count(name, Right::Send), 1);
        assert_eq!(space.invalid_releases(), 0);
    }

    #[test]
    fn transferred_capabilities_are_not_released() {
        let space = Arc::new(LoopbackPortSpace::new());
        let name = space.allocate().expect("allocate");
        let shared: Arc<dyn PortSpace> = space.clone();
        OwnedCapability::adopt(shared, name, Right::Receive).transfer();

        assert_eq!(space.release_count(name, Right::Receive), 0);
    }

    #[test]
    fn wake_messages_are_header_only() {
        let bytes = wake_message(PortName::new(0x103));
        assert_eq!(bytes.len(), HEADER_SIZE);
        let envelope = Envelope::read(&bytes).expect("wake message reads");
        assert!(is_wake(envelope.header.id));
        assert_eq!(envelope.header.local_port, PortName::NULL);
    }
}
