//! Byte-exact codec for the bootstrap request/reply protocol.
//!
//! Unmodified clients talk to the rendezvous broker with the same messages
//! they would send to the host's service directory. This crate decodes those
//! requests and encodes the replies; it holds no state and performs no I/O.
//!
//! - [`decode_request`] reads the authoritative size from the header, so
//!   receive buffers may be larger than the message (transports append a
//!   trailer).
//! - [`encode_reply`] produces either a 40-byte port reply (complex) or a
//!   36-byte status reply (simple).
//! - Names travel either as a MIG `name_t` or length-prefixed; see
//!   [`NameLayout`].
//!
//! All integers are in host byte order.
//!
//! ```
//! use rendezvous_wire::{
//!     NameLayout, PortName, Request, RequestBody, ServiceName, decode_request, encode_request,
//! };
//!
//! let name = ServiceName::new("com.example.render", NameLayout::Fixed)?;
//! let request = Request::new(
//!     RequestBody::LookUp { name },
//!     PortName::new(0x103),
//!     PortName::new(0x207),
//! );
//! let bytes = encode_request(&request);
//! assert_eq!(bytes.len(), 160);
//! assert_eq!(decode_request(&bytes)?, request);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bytes;
mod descriptor;
mod envelope;
mod error;
mod header;
mod ids;
mod name;
mod reply;
mod request;

pub use descriptor::{PORT_DESCRIPTOR_SIZE, PortDescriptor};
pub use envelope::{Envelope, MAX_DESCRIPTORS};
pub use error::CodecError;
pub use header::{
    BODY_SIZE, Disposition, HEADER_SIZE, MessageBits, MessageHeader, NDR_SIZE, NdrRecord,
    PortName,
};
pub use ids::{MIG_REPLY_OFFSET, MessageId, Status};
pub use name::{NAME_CAPACITY, NameError, NameLayout, ServiceName};
pub use reply::{
    PORT_REPLY_SIZE, Reply, ReplyBody, STATUS_REPLY_SIZE, decode_reply, encode_reply,
};
pub use request::{
    FIXED_REGISTER_REQUEST_SIZE, FIXED_SIMPLE_REQUEST_SIZE, PREFIXED_REGISTER_REQUEST_SIZE,
    PREFIXED_SIMPLE_REQUEST_SIZE, Request, RequestBody, decode_request, encode_request,
};

/// Space reserved for the trailer a transport appends after the message.
pub const MAX_TRAILER_SIZE: usize = 68;

/// Receive buffer size: comfortably larger than any request plus trailer.
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

#[cfg(test)]
mod tests;
