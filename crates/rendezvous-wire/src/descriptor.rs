//! Port descriptors carried by complex messages.
//!
//! ```text
//! +---------------+---------------+-------+------+------+
//! | name (u32)    | pad1 (u32)    | pad2  | disp | type |
//! +---------------+---------------+-------+------+------+
//!        4               4           2      1      1
//! ```

use crate::bytes::{Reader, Writer};
use crate::error::CodecError;
use crate::header::{Disposition, PortName};

/// Size of a port descriptor in bytes.
pub const PORT_DESCRIPTOR_SIZE: usize = 12;

/// `MACH_MSG_PORT_DESCRIPTOR`.
const PORT_DESCRIPTOR_TYPE: u8 = 0;

/// A single port right carried in a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    /// Name of the right in the sender's (or, on receipt, receiver's) space.
    pub name: PortName,
    /// How the right is transferred or, on receipt, which right arrived.
    pub disposition: Disposition,
}

impl PortDescriptor {
    /// Builds a descriptor.
    #[must_use]
    pub const fn new(name: PortName, disposition: Disposition) -> Self {
        Self { name, disposition }
    }

    pub(crate) fn read(reader: &mut Reader<'_>, id: i32) -> Result<Self, CodecError> {
        let available = reader.remaining();
        let truncated = || CodecError::Truncated {
            id,
            expected: PORT_DESCRIPTOR_SIZE,
            actual: available,
        };
        let name = reader.u32().ok_or_else(truncated)?;
        let _pad1 = reader.u32().ok_or_else(truncated)?;
        let _pad2 = reader.u16().ok_or_else(truncated)?;
        let raw_disposition = reader.u8().ok_or_else(truncated)?;
        let kind = reader.u8().ok_or_else(truncated)?;
        if kind != PORT_DESCRIPTOR_TYPE {
            return Err(CodecError::MalformedDescriptor {
                id,
                reason: "descriptor is not a port descriptor",
            });
        }
        let disposition =
            Disposition::from_raw(raw_disposition).ok_or(CodecError::MalformedDescriptor {
                id,
                reason: "unknown port disposition",
            })?;
        Ok(Self {
            name: PortName::new(name),
            disposition,
        })
    }

    pub(crate) fn write(&self, writer: &mut Writer) {
        writer.put_u32(self.name.raw());
        writer.put_u32(0);
        writer.put_u16(0);
        writer.put_u8(self.disposition.raw());
        writer.put_u8(PORT_DESCRIPTOR_TYPE);
    }
}
