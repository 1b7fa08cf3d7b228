//! Codec tests against hand-assembled messages.
#![expect(
    clippy::host_endian_bytes,
    reason = "fixtures are assembled in host byte order like real clients"
)]

mod requests;

use crate::{Disposition, MessageBits, NdrRecord};

/// Builds a raw message the way a C client lays it out in memory.
pub(super) struct RawMessage {
    bytes: Vec<u8>,
}

impl RawMessage {
    pub(super) fn header(bits: MessageBits, size: u32, remote: u32, local: u32, id: i32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&bits.raw().to_ne_bytes());
        bytes.extend_from_slice(&size.to_ne_bytes());
        bytes.extend_from_slice(&remote.to_ne_bytes());
        bytes.extend_from_slice(&local.to_ne_bytes());
        bytes.extend_from_slice(&0_u32.to_ne_bytes());
        bytes.extend_from_slice(&id.to_ne_bytes());
        Self { bytes }
    }

    /// Header for a request as the broker receives it: reply right in the
    /// remote slot, arrived as a send-once right.
    pub(super) fn received(size: u32, id: i32) -> Self {
        Self::received_with(size, id, false)
    }

    /// As [`RawMessage::received`] with the complex bit set.
    pub(super) fn received_complex(size: u32, id: i32) -> Self {
        Self::received_with(size, id, true)
    }

    fn received_with(size: u32, id: i32, complex: bool) -> Self {
        let bits = MessageBits::new(
            Some(Disposition::MoveSendOnce),
            Some(Disposition::MoveSend),
            complex,
        );
        Self::header(bits, size, 0x1207, 0x1103, id)
    }

    pub(super) fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(super) fn ndr(mut self) -> Self {
        self.bytes.extend_from_slice(&NdrRecord::HOST.bytes());
        self
    }

    pub(super) fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub(super) fn name_t(self, name: &str) -> Self {
        let mut field = [0_u8; 128];
        field[..name.len()].copy_from_slice(name.as_bytes());
        self.raw(&field)
    }

    pub(super) fn prefixed_name(self, name: &str) -> Self {
        let length = u32::try_from(name.len()).expect("test names fit in u32");
        self.u32(length).name_t(name)
    }

    pub(super) fn port_descriptor(self, name: u32, disposition: u8) -> Self {
        self.u32(name).u32(0).raw(&[0, 0, disposition, 0])
    }

    pub(super) fn build(self) -> Vec<u8> {
        self.bytes
    }
}
