//! The fixed 24-byte message header and the NDR record.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|          voucher / reserved     | local disp  | remote disp |  bits
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         message size                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                remote port (reply right on receipt)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          local port                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         voucher port                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          message id                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;

use crate::bytes::{Reader, Writer};
use crate::error::CodecError;

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Size of the NDR record in bytes.
pub const NDR_SIZE: usize = 8;

/// Size of the descriptor count that follows the header of a complex message.
pub const BODY_SIZE: usize = 4;

/// Name of a port right within a task's port namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortName(u32);

impl PortName {
    /// The null port name.
    pub const NULL: Self = Self(0);

    /// Wraps a raw port name.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value as it appears on the wire.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the null name.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Port right dispositions used in headers and descriptors.
///
/// On receipt the kernel reports the right that arrived, which shares its
/// numeric value with the matching `Move*` disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Move a receive right (`MACH_MSG_TYPE_MOVE_RECEIVE`, 16).
    MoveReceive,
    /// Move a send right (`MACH_MSG_TYPE_MOVE_SEND`, 17).
    MoveSend,
    /// Move a send-once right (`MACH_MSG_TYPE_MOVE_SEND_ONCE`, 18).
    MoveSendOnce,
    /// Copy a send right (`MACH_MSG_TYPE_COPY_SEND`, 19).
    CopySend,
    /// Make a send right from a receive right (`MACH_MSG_TYPE_MAKE_SEND`, 20).
    MakeSend,
    /// Make a send-once right (`MACH_MSG_TYPE_MAKE_SEND_ONCE`, 21).
    MakeSendOnce,
}

impl Disposition {
    /// Decodes a raw disposition value.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            16 => Some(Self::MoveReceive),
            17 => Some(Self::MoveSend),
            18 => Some(Self::MoveSendOnce),
            19 => Some(Self::CopySend),
            20 => Some(Self::MakeSend),
            21 => Some(Self::MakeSendOnce),
            _ => None,
        }
    }

    /// The right the receiver holds once a message carrying this
    /// disposition has been delivered.
    #[must_use]
    pub const fn on_receipt(self) -> Self {
        match self {
            Self::MoveReceive => Self::MoveReceive,
            Self::MoveSend | Self::CopySend | Self::MakeSend => Self::MoveSend,
            Self::MoveSendOnce | Self::MakeSendOnce => Self::MoveSendOnce,
        }
    }

    /// Raw value as it appears on the wire.
    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            Self::MoveReceive => 16,
            Self::MoveSend => 17,
            Self::MoveSendOnce => 18,
            Self::CopySend => 19,
            Self::MakeSend => 20,
            Self::MakeSendOnce => 21,
        }
    }
}

/// The `msgh_bits` word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageBits(u32);

impl MessageBits {
    /// Set when the body starts with a descriptor count.
    pub const COMPLEX: u32 = 0x8000_0000;
    const REMOTE_MASK: u32 = 0x0000_001f;
    const LOCAL_MASK: u32 = 0x0000_1f00;
    const LOCAL_SHIFT: u32 = 8;

    /// Builds the bits word from its parts.
    #[must_use]
    pub const fn new(
        remote: Option<Disposition>,
        local: Option<Disposition>,
        complex: bool,
    ) -> Self {
        let mut raw = 0;
        if let Some(disposition) = remote {
            raw |= disposition.raw() as u32;
        }
        if let Some(disposition) = local {
            raw |= (disposition.raw() as u32) << Self::LOCAL_SHIFT;
        }
        if complex {
            raw |= Self::COMPLEX;
        }
        Self(raw)
    }

    /// Wraps a raw bits word.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value as it appears on the wire.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether the complex bit is set.
    #[must_use]
    pub const fn is_complex(self) -> bool {
        self.0 & Self::COMPLEX != 0
    }

    /// Disposition of the remote (reply, on receipt) port.
    #[must_use]
    pub fn remote(self) -> Option<Disposition> {
        u8::try_from(self.0 & Self::REMOTE_MASK)
            .ok()
            .and_then(Disposition::from_raw)
    }

    /// Disposition of the local port.
    #[must_use]
    pub fn local(self) -> Option<Disposition> {
        u8::try_from((self.0 & Self::LOCAL_MASK) >> Self::LOCAL_SHIFT)
            .ok()
            .and_then(Disposition::from_raw)
    }

    /// Returns a copy with the complex bit set or cleared.
    #[must_use]
    pub const fn with_complex(self, complex: bool) -> Self {
        if complex {
            Self(self.0 | Self::COMPLEX)
        } else {
            Self(self.0 & !Self::COMPLEX)
        }
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    /// Rights and complex flag.
    pub bits: MessageBits,
    /// Declared message size. Authoritative over the buffer length.
    pub size: u32,
    /// Remote port; the reply right when the message has been received.
    pub remote_port: PortName,
    /// Local port; the destination right when the message has been received.
    pub local_port: PortName,
    /// Voucher port, unused by the bootstrap protocol.
    pub voucher_port: PortName,
    /// Message identifier.
    pub id: i32,
}

impl MessageHeader {
    pub(crate) fn read(reader: &mut Reader<'_>, available: usize) -> Result<Self, CodecError> {
        let truncated = || CodecError::Truncated {
            id: 0,
            expected: HEADER_SIZE,
            actual: available,
        };
        let bits = reader.u32().ok_or_else(truncated)?;
        let size = reader.u32().ok_or_else(truncated)?;
        let remote_port = reader.u32().ok_or_else(truncated)?;
        let local_port = reader.u32().ok_or_else(truncated)?;
        let voucher_port = reader.u32().ok_or_else(truncated)?;
        let id = reader.i32().ok_or_else(truncated)?;
        Ok(Self {
            bits: MessageBits::from_raw(bits),
            size,
            remote_port: PortName::new(remote_port),
            local_port: PortName::new(local_port),
            voucher_port: PortName::new(voucher_port),
            id,
        })
    }

    /// Writes the header; the size field is patched by [`Writer::finish`].
    pub(crate) fn write(&self, writer: &mut Writer) {
        writer.put_u32(self.bits.raw());
        writer.put_u32(self.size);
        writer.put_u32(self.remote_port.raw());
        writer.put_u32(self.local_port.raw());
        writer.put_u32(self.voucher_port.raw());
        writer.put_i32(self.id);
    }

    /// Declared size as a buffer length.
    #[must_use]
    pub fn declared_len(&self) -> usize {
        usize::try_from(self.size).unwrap_or(usize::MAX)
    }
}

/// The Network Data Representation record MIG places in every message that
/// carries plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdrRecord([u8; NDR_SIZE]);

#[cfg(target_endian = "little")]
const HOST_INT_REP: u8 = 1;
#[cfg(target_endian = "big")]
const HOST_INT_REP: u8 = 0;

impl NdrRecord {
    /// The record every client on this host sends (`NDR_record`).
    pub const HOST: Self = Self([0, 0, 0, 0, HOST_INT_REP, 0, 0, 0]);

    /// Wraps raw record bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NDR_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw record bytes.
    #[must_use]
    pub const fn bytes(self) -> [u8; NDR_SIZE] {
        self.0
    }

    pub(crate) fn write(self, writer: &mut Writer) {
        writer.put_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(Disposition::MoveSendOnce), None, false, 18)]
    #[case(Some(Disposition::CopySend), Some(Disposition::MakeSendOnce), true, 0x8000_1513)]
    #[case(None, None, true, 0x8000_0000)]
    fn bits_pack_dispositions(
        #[case] remote: Option<Disposition>,
        #[case] local: Option<Disposition>,
        #[case] complex: bool,
        #[case] expected: u32,
    ) {
        let bits = MessageBits::new(remote, local, complex);
        assert_eq!(bits.raw(), expected);
        assert_eq!(bits.remote(), remote);
        assert_eq!(bits.local(), local);
        assert_eq!(bits.is_complex(), complex);
    }

    #[rstest]
    #[case(Disposition::MakeSendOnce, Disposition::MoveSendOnce)]
    #[case(Disposition::CopySend, Disposition::MoveSend)]
    #[case(Disposition::MakeSend, Disposition::MoveSend)]
    #[case(Disposition::MoveReceive, Disposition::MoveReceive)]
    fn delivery_reports_the_arrived_right(#[case] sent: Disposition, #[case] arrived: Disposition) {
        assert_eq!(sent.on_receipt(), arrived);
    }

    #[rstest]
    #[case(0x0000_001f, None)]
    #[case(0x0000_1f00, None)]
    #[case(0xffff_e0e0, None)]
    #[case(0x8000_0011, Some(Disposition::MoveSend))]
    fn bits_outside_the_disposition_fields_are_ignored(
        #[case] raw: u32,
        #[case] remote: Option<Disposition>,
    ) {
        let bits = MessageBits::from_raw(raw);
        assert_eq!(bits.remote(), remote);
        assert_eq!(bits.local(), None);
    }

    #[test]
    fn unknown_disposition_values_are_rejected() {
        assert_eq!(Disposition::from_raw(0), None);
        assert_eq!(Disposition::from_raw(22), None);
    }

    #[test]
    fn port_names_display_in_hex() {
        assert_eq!(PortName::new(0x1703).to_string(), "0x1703");
        assert!(PortName::NULL.is_null());
    }
}
