//! Reply encoding.
//!
//! ```text
//! port reply:   header(24, complex) | count(4) = 1 | desc(12)   40 bytes
//! status reply: header(24)          | ndr(8) | status(4)        36 bytes
//! ```

use crate::bytes::{Reader, Writer};
use crate::descriptor::{PORT_DESCRIPTOR_SIZE, PortDescriptor};
use crate::error::CodecError;
use crate::header::{
    BODY_SIZE, Disposition, HEADER_SIZE, MessageBits, MessageHeader, NDR_SIZE, NdrRecord,
    PortName,
};
use crate::ids::{MIG_REPLY_OFFSET, Status};
use crate::request::Request;

/// Size of a reply carrying a port.
pub const PORT_REPLY_SIZE: usize = HEADER_SIZE + BODY_SIZE + PORT_DESCRIPTOR_SIZE;
/// Size of a reply carrying a status code.
pub const STATUS_REPLY_SIZE: usize = HEADER_SIZE + NDR_SIZE + 4;

/// What a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyBody {
    /// A port right; encoded as a complex message.
    Port(PortDescriptor),
    /// A return code; encoded as a simple message.
    Status(Status),
}

/// A reply addressed to a request's reply right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// The reply right.
    pub destination: PortName,
    /// How the reply right is used; normally move-send-once.
    pub disposition: Disposition,
    /// Reply identifier (request identifier plus 100).
    pub id: i32,
    /// Payload.
    pub body: ReplyBody,
}

impl Reply {
    /// Builds a reply to `request`, or `None` when it carries no reply right.
    #[must_use]
    pub fn to(request: &Request, body: ReplyBody) -> Option<Self> {
        let (destination, disposition) = request.reply_port()?;
        Some(Self {
            destination,
            disposition,
            id: request.header.id.saturating_add(MIG_REPLY_OFFSET),
            body,
        })
    }

    /// Encoded length of this reply.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self.body {
            ReplyBody::Port(_) => PORT_REPLY_SIZE,
            ReplyBody::Status(_) => STATUS_REPLY_SIZE,
        }
    }
}

/// Encodes a reply. The same reply always yields the same bytes.
#[must_use]
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let complex = matches!(reply.body, ReplyBody::Port(_));
    let mut writer = Writer::with_capacity(reply.encoded_len());
    MessageHeader {
        bits: MessageBits::new(Some(reply.disposition), None, complex),
        size: 0,
        remote_port: reply.destination,
        local_port: PortName::NULL,
        voucher_port: PortName::NULL,
        id: reply.id,
    }
    .write(&mut writer);
    match reply.body {
        ReplyBody::Port(descriptor) => {
            writer.put_u32(1);
            descriptor.write(&mut writer);
        }
        ReplyBody::Status(status) => {
            NdrRecord::HOST.write(&mut writer);
            writer.put_i32(status.code());
        }
    }
    writer.finish()
}

/// Decodes a reply as a client receives it.
pub fn decode_reply(bytes: &[u8]) -> Result<Reply, CodecError> {
    let mut reader = Reader::new(bytes);
    let header = MessageHeader::read(&mut reader, bytes.len())?;
    let id = header.id;
    let declared = header.declared_len();
    let expected = if header.bits.is_complex() {
        PORT_REPLY_SIZE
    } else {
        STATUS_REPLY_SIZE
    };
    if declared != expected {
        return Err(CodecError::UnexpectedReply { id, size: declared });
    }
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            id,
            expected,
            actual: bytes.len(),
        });
    }
    let truncated = CodecError::Truncated {
        id,
        expected,
        actual: bytes.len(),
    };
    let disposition = header.bits.remote().unwrap_or(Disposition::MoveSendOnce);
    let body = if header.bits.is_complex() {
        let count = reader.u32().ok_or_else(|| truncated.clone())?;
        if count != 1 {
            return Err(CodecError::MalformedDescriptor {
                id,
                reason: "expected exactly one descriptor",
            });
        }
        ReplyBody::Port(PortDescriptor::read(&mut reader, id)?)
    } else {
        let record = reader.array::<NDR_SIZE>().ok_or_else(|| truncated.clone())?;
        if NdrRecord::from_bytes(record) != NdrRecord::HOST {
            return Err(CodecError::UnknownEncoding { id, record });
        }
        ReplyBody::Status(Status::from_code(reader.i32().ok_or(truncated)?))
    };
    Ok(Reply {
        destination: header.remote_port,
        disposition,
        id,
        body,
    })
}
