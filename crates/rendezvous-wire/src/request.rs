//! Request decoding and encoding.
//!
//! Two body families exist:
//!
//! ```text
//! simple:   header(24) | ndr(8) | name                      160 or 164 bytes
//! register: header(24) | count(4) | desc(12) | ndr(8) | name 176 or 180 bytes
//! ```
//!
//! `name` is either a 128-byte `name_t` or `name_len: u32` plus 128 bytes.
//! Extension identifiers always use the length-prefixed form; standard
//! identifiers use whichever form the declared size matches.

use crate::bytes::{Reader, Writer};
use crate::descriptor::{PORT_DESCRIPTOR_SIZE, PortDescriptor};
use crate::error::CodecError;
use crate::header::{
    BODY_SIZE, Disposition, HEADER_SIZE, MessageBits, MessageHeader, NDR_SIZE, NdrRecord,
    PortName,
};
use crate::ids::MessageId;
use crate::name::{NameLayout, ServiceName};

/// Size of a simple request with a fixed `name_t`.
pub const FIXED_SIMPLE_REQUEST_SIZE: usize = HEADER_SIZE + NDR_SIZE + 128;
/// Size of a simple request with a length-prefixed name.
pub const PREFIXED_SIMPLE_REQUEST_SIZE: usize = FIXED_SIMPLE_REQUEST_SIZE + 4;
/// Size of a register request with a fixed `name_t`.
pub const FIXED_REGISTER_REQUEST_SIZE: usize =
    HEADER_SIZE + BODY_SIZE + PORT_DESCRIPTOR_SIZE + NDR_SIZE + 128;
/// Size of a register request with a length-prefixed name.
pub const PREFIXED_REGISTER_REQUEST_SIZE: usize = FIXED_REGISTER_REQUEST_SIZE + 4;

/// Decoded request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Create a port for `name` and hand back its receive right.
    CheckIn {
        /// Service being checked in.
        name: ServiceName,
    },
    /// Store the carried send right under `name`.
    Register {
        /// Service being registered.
        name: ServiceName,
        /// The carried right.
        port: PortDescriptor,
    },
    /// Return a send right for `name`.
    LookUp {
        /// Service being looked up.
        name: ServiceName,
    },
    /// Ask for the parent bootstrap port.
    Parent,
    /// Ask for a subset bootstrap port.
    Subset,
    /// Extension form of [`RequestBody::Register`].
    RegisterPort {
        /// Service being registered.
        name: ServiceName,
        /// The carried right.
        port: PortDescriptor,
    },
    /// Extension form of [`RequestBody::LookUp`].
    LookupPort {
        /// Service being looked up.
        name: ServiceName,
    },
    /// Ask the broker to spawn an application.
    SpawnApp,
    /// Broker-internal wake-up.
    Wake,
    /// An identifier the broker does not handle.
    Unknown {
        /// Raw identifier.
        id: i32,
    },
}

impl RequestBody {
    /// Raw identifier for this body.
    #[must_use]
    pub const fn id(&self) -> i32 {
        match self.message_id() {
            Some(id) => id.raw(),
            None => match self {
                Self::Unknown { id } => *id,
                _ => 0,
            },
        }
    }

    /// Known identifier for this body, if any.
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::CheckIn { .. } => Some(MessageId::CheckIn),
            Self::Register { .. } => Some(MessageId::Register),
            Self::LookUp { .. } => Some(MessageId::LookUp),
            Self::Parent => Some(MessageId::Parent),
            Self::Subset => Some(MessageId::Subset),
            Self::RegisterPort { .. } => Some(MessageId::RegisterPort),
            Self::LookupPort { .. } => Some(MessageId::LookupPort),
            Self::SpawnApp => Some(MessageId::SpawnApp),
            Self::Wake => Some(MessageId::Wake),
            Self::Unknown { .. } => None,
        }
    }

    /// Service name carried by the body, if any.
    #[must_use]
    pub const fn name(&self) -> Option<&ServiceName> {
        match self {
            Self::CheckIn { name }
            | Self::Register { name, .. }
            | Self::LookUp { name }
            | Self::RegisterPort { name, .. }
            | Self::LookupPort { name } => Some(name),
            _ => None,
        }
    }

    /// Port descriptor carried by the body, if any.
    #[must_use]
    pub const fn port(&self) -> Option<&PortDescriptor> {
        match self {
            Self::Register { port, .. } | Self::RegisterPort { port, .. } => Some(port),
            _ => None,
        }
    }

    const fn is_complex(&self) -> bool {
        self.port().is_some()
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Header as received.
    pub header: MessageHeader,
    /// Decoded body.
    pub body: RequestBody,
}

impl Request {
    /// Builds a request as a client would send it: the reply port is made
    /// into a send-once right and the destination is copied.
    ///
    /// The header size is filled in to match [`encode_request`].
    #[must_use]
    pub fn new(body: RequestBody, destination: PortName, reply_port: PortName) -> Self {
        let reply = (!reply_port.is_null()).then_some(Disposition::MakeSendOnce);
        let mut header = MessageHeader {
            bits: MessageBits::new(Some(Disposition::CopySend), reply, body.is_complex()),
            size: 0,
            remote_port: destination,
            local_port: reply_port,
            voucher_port: PortName::NULL,
            id: body.id(),
        };
        header.size = u32::try_from(encoded_len(&body)).unwrap_or(u32::MAX);
        Self { header, body }
    }

    /// Known identifier of the request, if any.
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        self.body.message_id()
    }

    /// The reply right as seen by the receiver: remote port and disposition.
    #[must_use]
    pub fn reply_port(&self) -> Option<(PortName, Disposition)> {
        if self.header.remote_port.is_null() {
            return None;
        }
        match self.header.bits.remote() {
            Some(disposition) => Some((self.header.remote_port, disposition)),
            None => Some((self.header.remote_port, Disposition::MoveSendOnce)),
        }
    }
}

fn encoded_len(body: &RequestBody) -> usize {
    let name_len = body.name().map_or(0, |name| name.layout().encoded_len());
    match body {
        RequestBody::Register { .. } | RequestBody::RegisterPort { .. } => {
            HEADER_SIZE + BODY_SIZE + PORT_DESCRIPTOR_SIZE + NDR_SIZE + name_len
        }
        RequestBody::CheckIn { .. } | RequestBody::LookUp { .. } | RequestBody::LookupPort { .. } => {
            HEADER_SIZE + NDR_SIZE + name_len
        }
        _ => HEADER_SIZE,
    }
}

/// Decodes a received request.
///
/// `bytes` may be longer than the message: the header's size field decides
/// how much of it is read.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let mut reader = Reader::new(bytes);
    let header = MessageHeader::read(&mut reader, bytes.len())?;
    let id = header.id;
    let declared = header.declared_len();
    if declared < HEADER_SIZE {
        return Err(CodecError::Truncated {
            id,
            expected: HEADER_SIZE,
            actual: declared,
        });
    }
    if declared > bytes.len() {
        return Err(CodecError::Truncated {
            id,
            expected: declared,
            actual: bytes.len(),
        });
    }
    let body_bytes = bytes.get(HEADER_SIZE..declared).unwrap_or_default();
    let mut body_reader = Reader::new(body_bytes);

    let Some(kind) = MessageId::from_raw(id) else {
        return Ok(Request {
            header,
            body: RequestBody::Unknown { id },
        });
    };

    let body = match kind {
        MessageId::CheckIn => RequestBody::CheckIn {
            name: read_simple(&mut body_reader, kind, declared)?,
        },
        MessageId::LookUp => RequestBody::LookUp {
            name: read_simple(&mut body_reader, kind, declared)?,
        },
        MessageId::LookupPort => RequestBody::LookupPort {
            name: read_simple(&mut body_reader, kind, declared)?,
        },
        MessageId::Register => {
            let (name, port) = read_register(&mut body_reader, &header, kind)?;
            RequestBody::Register { name, port }
        }
        MessageId::RegisterPort => {
            let (name, port) = read_register(&mut body_reader, &header, kind)?;
            RequestBody::RegisterPort { name, port }
        }
        MessageId::Parent => RequestBody::Parent,
        MessageId::Subset => RequestBody::Subset,
        MessageId::SpawnApp => RequestBody::SpawnApp,
        MessageId::Wake => RequestBody::Wake,
    };
    Ok(Request { header, body })
}

/// Encodes a request. Size, identifier and complex bit are derived from the
/// body.
#[must_use]
pub fn encode_request(request: &Request) -> Vec<u8> {
    let body = &request.body;
    let mut writer = Writer::with_capacity(encoded_len(body));
    let header = MessageHeader {
        bits: request.header.bits.with_complex(body.is_complex()),
        id: body.id(),
        ..request.header
    };
    header.write(&mut writer);
    if let Some(port) = body.port() {
        writer.put_u32(1);
        port.write(&mut writer);
    }
    if let Some(name) = body.name() {
        NdrRecord::HOST.write(&mut writer);
        name.write(&mut writer);
    }
    writer.finish()
}

fn layout_for(kind: MessageId, declared: usize, prefixed_size: usize) -> NameLayout {
    if kind.is_extension() || declared >= prefixed_size {
        NameLayout::LengthPrefixed
    } else {
        NameLayout::Fixed
    }
}

fn require(id: i32, declared: usize, expected: usize) -> Result<(), CodecError> {
    if declared < expected {
        return Err(CodecError::Truncated {
            id,
            expected,
            actual: declared,
        });
    }
    Ok(())
}

fn read_ndr(reader: &mut Reader<'_>, id: i32) -> Result<(), CodecError> {
    let available = reader.remaining();
    let record = reader
        .array::<NDR_SIZE>()
        .ok_or(CodecError::Truncated {
            id,
            expected: NDR_SIZE,
            actual: available,
        })?;
    if NdrRecord::from_bytes(record) != NdrRecord::HOST {
        return Err(CodecError::UnknownEncoding { id, record });
    }
    Ok(())
}

fn read_simple(
    reader: &mut Reader<'_>,
    kind: MessageId,
    declared: usize,
) -> Result<ServiceName, CodecError> {
    let id = kind.raw();
    let layout = layout_for(kind, declared, PREFIXED_SIMPLE_REQUEST_SIZE);
    let minimum = match layout {
        NameLayout::Fixed => FIXED_SIMPLE_REQUEST_SIZE,
        NameLayout::LengthPrefixed => PREFIXED_SIMPLE_REQUEST_SIZE,
    };
    require(id, declared, minimum)?;
    read_ndr(reader, id)?;
    ServiceName::read(reader, layout, id)
}

fn read_register(
    reader: &mut Reader<'_>,
    header: &MessageHeader,
    kind: MessageId,
) -> Result<(ServiceName, PortDescriptor), CodecError> {
    let id = kind.raw();
    let declared = header.declared_len();
    let layout = layout_for(kind, declared, PREFIXED_REGISTER_REQUEST_SIZE);
    let minimum = match layout {
        NameLayout::Fixed => FIXED_REGISTER_REQUEST_SIZE,
        NameLayout::LengthPrefixed => PREFIXED_REGISTER_REQUEST_SIZE,
    };
    require(id, declared, minimum)?;
    if !header.bits.is_complex() {
        return Err(CodecError::MalformedDescriptor {
            id,
            reason: "complex bit is not set",
        });
    }
    let count = reader.u32().ok_or(CodecError::Truncated {
        id,
        expected: minimum,
        actual: declared,
    })?;
    if count != 1 {
        return Err(CodecError::MalformedDescriptor {
            id,
            reason: "expected exactly one descriptor",
        });
    }
    let port = PortDescriptor::read(reader, id)?;
    read_ndr(reader, id)?;
    let name = ServiceName::read(reader, layout, id)?;
    Ok((name, port))
}
