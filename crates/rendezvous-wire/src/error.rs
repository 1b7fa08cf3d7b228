//! Decoding failures.

use thiserror::Error;

/// Errors raised while decoding a message.
///
/// None of these are fatal to the broker: the offending message is logged
/// and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The message is shorter than its identifier requires, or its header
    /// declares more bytes than were received.
    #[error("message {id} truncated: expected {expected} bytes, found {actual}")]
    Truncated {
        /// Message identifier, or 0 when the header itself is incomplete.
        id: i32,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// The NDR record does not describe this host.
    #[error("message {id} carries unsupported NDR record {record:02x?}")]
    UnknownEncoding {
        /// Message identifier.
        id: i32,
        /// Record found in the message.
        record: [u8; 8],
    },
    /// The name does not fit the name field.
    #[error("message {id} names {length} bytes; the name field holds 128")]
    NameTooLong {
        /// Message identifier.
        id: i32,
        /// Length claimed by the message.
        length: usize,
    },
    /// The name is not UTF-8.
    #[error("message {id} carries a service name that is not UTF-8")]
    InvalidName {
        /// Message identifier.
        id: i32,
    },
    /// A message that must carry exactly one port descriptor does not.
    #[error("message {id} has a malformed port descriptor: {reason}")]
    MalformedDescriptor {
        /// Message identifier.
        id: i32,
        /// What was wrong with the descriptor block.
        reason: &'static str,
    },
    /// A reply has neither the port nor the status shape.
    #[error("reply {id} has unexpected size {size}")]
    UnexpectedReply {
        /// Reply identifier.
        id: i32,
        /// Declared size.
        size: usize,
    },
}

impl CodecError {
    /// Identifier of the message that failed to decode.
    #[must_use]
    pub const fn id(&self) -> i32 {
        match self {
            Self::Truncated { id, .. }
            | Self::UnknownEncoding { id, .. }
            | Self::NameTooLong { id, .. }
            | Self::InvalidName { id }
            | Self::MalformedDescriptor { id, .. }
            | Self::UnexpectedReply { id, .. } => *id,
        }
    }
}
