//! The rights-bearing parts of a message.
//!
//! Transports need the header and the port descriptors of every message they
//! carry, whatever its identifier, so they can move rights and rename ports
//! for the receiver. [`Envelope`] reads and rewrites exactly those parts and
//! leaves the rest of the message alone.

use crate::bytes::{Reader, Writer};
use crate::descriptor::{PORT_DESCRIPTOR_SIZE, PortDescriptor};
use crate::error::CodecError;
use crate::header::{
    BODY_SIZE, Disposition, HEADER_SIZE, MessageBits, MessageHeader, PortName,
};

/// Most descriptors a transport accepts in one message.
pub const MAX_DESCRIPTORS: usize = 8;

/// Header and port descriptors of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The message header.
    pub header: MessageHeader,
    /// Port descriptors, in body order. Empty for simple messages.
    pub descriptors: Vec<PortDescriptor>,
}

impl Envelope {
    /// Reads the envelope of `message`.
    pub fn read(message: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(message);
        let header = MessageHeader::read(&mut reader, message.len())?;
        let id = header.id;
        let declared = header.declared_len();
        if declared < HEADER_SIZE {
            return Err(CodecError::Truncated {
                id,
                expected: HEADER_SIZE,
                actual: declared,
            });
        }
        if declared > message.len() {
            return Err(CodecError::Truncated {
                id,
                expected: declared,
                actual: message.len(),
            });
        }
        if !header.bits.is_complex() {
            return Ok(Self {
                header,
                descriptors: Vec::new(),
            });
        }

        let body = message.get(HEADER_SIZE..declared).unwrap_or_default();
        let mut body_reader = Reader::new(body);
        let count = body_reader.u32().ok_or(CodecError::Truncated {
            id,
            expected: HEADER_SIZE + BODY_SIZE,
            actual: declared,
        })?;
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        if count > MAX_DESCRIPTORS {
            return Err(CodecError::MalformedDescriptor {
                id,
                reason: "too many descriptors",
            });
        }
        let descriptors = (0..count)
            .map(|_| PortDescriptor::read(&mut body_reader, id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            header,
            descriptors,
        })
    }

    /// Overwrites the header and descriptors of `message` in place.
    ///
    /// The descriptor count must match the one already in the message.
    pub fn write_into(&self, message: &mut [u8]) -> Result<(), CodecError> {
        let mut writer = Writer::with_capacity(self.encoded_len());
        self.header.write(&mut writer);
        if self.header.bits.is_complex() {
            writer.put_u32(u32::try_from(self.descriptors.len()).unwrap_or(u32::MAX));
            for descriptor in &self.descriptors {
                descriptor.write(&mut writer);
            }
        }
        let bytes = writer.into_inner();
        let available = message.len();
        let target = message
            .get_mut(..bytes.len())
            .ok_or(CodecError::Truncated {
                id: self.header.id,
                expected: bytes.len(),
                actual: available,
            })?;
        target.copy_from_slice(&bytes);
        Ok(())
    }

    /// Rewrites the envelope into the form its receiver sees.
    ///
    /// `destination` is the receiver's name for the port the message
    /// arrived on. `reply` is its name for the right the header's local port
    /// carried and `ports` its names for the descriptor rights, in order.
    /// Dispositions become the rights that actually arrived.
    #[must_use]
    pub fn delivered(&self, destination: PortName, reply: PortName, ports: &[PortName]) -> Self {
        let bits = self.header.bits;
        let reply_right = bits.local().map(Disposition::on_receipt);
        let destination_right = bits.remote().map(Disposition::on_receipt);
        let header = MessageHeader {
            bits: MessageBits::new(
                if reply.is_null() { None } else { reply_right },
                destination_right,
                bits.is_complex(),
            ),
            remote_port: reply,
            local_port: destination,
            ..self.header
        };
        let descriptors = self
            .descriptors
            .iter()
            .zip(ports)
            .map(|(descriptor, name)| {
                PortDescriptor::new(*name, descriptor.disposition.on_receipt())
            })
            .collect();
        Self {
            header,
            descriptors,
        }
    }

    fn encoded_len(&self) -> usize {
        if self.header.bits.is_complex() {
            HEADER_SIZE + BODY_SIZE + self.descriptors.len() * PORT_DESCRIPTOR_SIZE
        } else {
            HEADER_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::RawMessage;

    #[test]
    fn simple_messages_carry_no_descriptors() {
        let bytes = RawMessage::header(
            MessageBits::new(Some(Disposition::CopySend), Some(Disposition::MakeSendOnce), false),
            160,
            0x103,
            0x207,
            404,
        )
        .ndr()
        .name_t("svcA")
        .build();
        let envelope = Envelope::read(&bytes).expect("envelope reads");
        assert!(envelope.descriptors.is_empty());
        assert_eq!(envelope.header.local_port, PortName::new(0x207));
    }

    #[test]
    fn delivery_swaps_ports_and_converts_rights() {
        let bytes = RawMessage::header(
            MessageBits::new(Some(Disposition::CopySend), Some(Disposition::MakeSendOnce), true),
            176,
            0x103,
            0x207,
            403,
        )
        .u32(1)
        .port_descriptor(0x30b, Disposition::MakeSend.raw())
        .ndr()
        .name_t("svcA")
        .build();
        let envelope = Envelope::read(&bytes).expect("envelope reads");
        let delivered = envelope.delivered(
            PortName::new(0x1103),
            PortName::new(0x1207),
            &[PortName::new(0x130b)],
        );

        assert_eq!(delivered.header.remote_port, PortName::new(0x1207));
        assert_eq!(delivered.header.local_port, PortName::new(0x1103));
        assert_eq!(delivered.header.bits.remote(), Some(Disposition::MoveSendOnce));
        assert_eq!(delivered.header.bits.local(), Some(Disposition::MoveSend));
        assert_eq!(
            delivered.descriptors,
            vec![PortDescriptor::new(PortName::new(0x130b), Disposition::MoveSend)]
        );

        let mut rewritten = bytes.clone();
        delivered.write_into(&mut rewritten).expect("rewrite fits");
        assert_eq!(Envelope::read(&rewritten).expect("rewritten reads"), delivered);
        assert_eq!(rewritten.get(40..), bytes.get(40..), "body is untouched");
    }

    #[test]
    fn oversized_descriptor_counts_are_rejected() {
        let bytes = RawMessage::received_complex(28, 403).u32(9).build();
        assert!(matches!(
            Envelope::read(&bytes),
            Err(CodecError::MalformedDescriptor { id: 403, .. })
        ));
    }
}
