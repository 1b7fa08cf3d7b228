//! Service names in their two on-wire encodings.

use std::fmt;

use thiserror::Error;

use crate::bytes::{Reader, Writer};
use crate::error::CodecError;

/// Size of the name field in every request layout.
pub const NAME_CAPACITY: usize = 128;

/// How a service name is laid out in a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameLayout {
    /// MIG `name_t`: 128 bytes, NUL-terminated.
    Fixed,
    /// `name_len: u32` followed by a 128-byte field.
    LengthPrefixed,
}

impl NameLayout {
    /// Longest name the layout can carry.
    #[must_use]
    pub const fn max_len(self) -> usize {
        match self {
            Self::Fixed => NAME_CAPACITY - 1,
            Self::LengthPrefixed => NAME_CAPACITY,
        }
    }

    /// Bytes the layout occupies in a message.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Fixed => NAME_CAPACITY,
            Self::LengthPrefixed => NAME_CAPACITY + 4,
        }
    }
}

/// Rejected service name values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The value does not fit the layout.
    #[error("service name is {length} bytes but the layout holds at most {capacity}")]
    TooLong {
        /// Length of the rejected value.
        length: usize,
        /// Longest value the layout accepts.
        capacity: usize,
    },
    /// The value contains a NUL byte, which terminates names on the wire.
    #[error("service name contains a NUL byte")]
    InteriorNul,
}

/// A bounded service name together with the layout it travels in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    value: String,
    layout: NameLayout,
}

impl ServiceName {
    /// Validates `value` against `layout`.
    pub fn new(text: impl Into<String>, layout: NameLayout) -> Result<Self, NameError> {
        let value: String = text.into();
        if value.len() > layout.max_len() {
            return Err(NameError::TooLong {
                length: value.len(),
                capacity: layout.max_len(),
            });
        }
        if value.as_bytes().contains(&0) {
            return Err(NameError::InteriorNul);
        }
        Ok(Self { value, layout })
    }

    /// The name as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Layout the name was decoded from or will be encoded with.
    #[must_use]
    pub const fn layout(&self) -> NameLayout {
        self.layout
    }

    /// Consumes the name, returning the text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.value
    }

    pub(crate) fn read(
        reader: &mut Reader<'_>,
        layout: NameLayout,
        id: i32,
    ) -> Result<Self, CodecError> {
        let available = reader.remaining();
        let truncated = || CodecError::Truncated {
            id,
            expected: layout.encoded_len(),
            actual: available,
        };
        let length = match layout {
            NameLayout::Fixed => None,
            NameLayout::LengthPrefixed => {
                let declared = reader.u32().ok_or_else(truncated)?;
                Some(usize::try_from(declared).unwrap_or(usize::MAX))
            }
        };
        let field = reader
            .slice(NAME_CAPACITY)
            .ok_or_else(truncated)?;
        let raw = match length {
            Some(declared) if declared > NAME_CAPACITY => {
                return Err(CodecError::NameTooLong {
                    id,
                    length: declared,
                });
            }
            Some(declared) => field.get(..declared).unwrap_or(field),
            None => field,
        };
        // Names end at the first NUL in both layouts.
        let text = match raw.iter().position(|byte| *byte == 0) {
            Some(end) => raw.get(..end).unwrap_or(raw),
            None if length.is_none() => {
                return Err(CodecError::NameTooLong {
                    id,
                    length: NAME_CAPACITY,
                });
            }
            None => raw,
        };
        let value = std::str::from_utf8(text).map_err(|_| CodecError::InvalidName { id })?;
        Ok(Self {
            value: value.to_owned(),
            layout,
        })
    }

    pub(crate) fn write(&self, writer: &mut Writer) {
        let bytes = self.value.as_bytes();
        if self.layout == NameLayout::LengthPrefixed {
            writer.put_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
        }
        writer.put_slice(bytes);
        writer.put_zeros(NAME_CAPACITY.saturating_sub(bytes.len()));
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(NameLayout::Fixed, 127, true)]
    #[case(NameLayout::Fixed, 128, false)]
    #[case(NameLayout::LengthPrefixed, 128, true)]
    #[case(NameLayout::LengthPrefixed, 129, false)]
    fn names_respect_layout_capacity(
        #[case] layout: NameLayout,
        #[case] length: usize,
        #[case] accepted: bool,
    ) {
        let result = ServiceName::new("x".repeat(length), layout);
        assert_eq!(result.is_ok(), accepted, "length {length} under {layout:?}");
    }

    #[test]
    fn interior_nul_is_rejected() {
        let error = ServiceName::new("svc\0A", NameLayout::Fixed).expect_err("NUL must fail");
        assert_eq!(error, NameError::InteriorNul);
    }

    #[test]
    fn fixed_name_without_terminator_is_too_long() {
        let field = [b'a'; NAME_CAPACITY];
        let mut reader = Reader::new(&field);
        let error = ServiceName::read(&mut reader, NameLayout::Fixed, 404)
            .expect_err("unterminated name must fail");
        assert_eq!(
            error,
            CodecError::NameTooLong {
                id: 404,
                length: NAME_CAPACITY
            }
        );
    }

    #[test]
    fn prefixed_name_stops_at_embedded_nul() {
        let mut writer = Writer::with_capacity(NAME_CAPACITY + 4);
        writer.put_u32(8);
        writer.put_slice(b"svc\0tail");
        writer.put_zeros(NAME_CAPACITY - 8);
        let bytes = writer.into_inner();
        let mut reader = Reader::new(&bytes);
        let name = ServiceName::read(&mut reader, NameLayout::LengthPrefixed, 701)
            .expect("name should decode");
        assert_eq!(name.as_str(), "svc");
    }
}
