//! Host-order cursor helpers shared by the request and reply codecs.
//!
//! The bootstrap protocol never byte-swaps: clients and server share a host,
//! so every integer travels in native order.
#![expect(
    clippy::host_endian_bytes,
    reason = "bootstrap messages are exchanged in host byte order"
)]

/// Forward-only reader over a received message.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let chunk = self.slice(N)?;
        chunk.try_into().ok()
    }

    pub(crate) fn slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let chunk = self.bytes.get(self.offset..end)?;
        self.offset = end;
        Some(chunk)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.array::<4>().map(u32::from_ne_bytes)
    }

    pub(crate) fn i32(&mut self) -> Option<i32> {
        self.array::<4>().map(i32::from_ne_bytes)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.array::<2>().map(u16::from_ne_bytes)
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|[byte]| byte)
    }
}

/// Append-only writer producing a message buffer.
#[derive(Debug)]
pub(crate) struct Writer {
    buffer: Vec<u8>,
}

/// Offset of `msgh_size` within the header.
const SIZE_FIELD_OFFSET: usize = 4;

impl Writer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
    }

    pub(crate) fn put_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
    }

    pub(crate) fn put_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub(crate) fn put_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub(crate) fn put_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len().saturating_add(count), 0);
    }

    /// Patches the header size field with the final length and returns the
    /// buffer.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let size = u32::try_from(self.buffer.len()).unwrap_or(u32::MAX);
        if let Some(slot) = self
            .buffer
            .get_mut(SIZE_FIELD_OFFSET..SIZE_FIELD_OFFSET + 4)
        {
            slot.copy_from_slice(&size.to_ne_bytes());
        }
        self.buffer
    }

    /// Returns the buffer without touching the size field.
    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_stops_at_end_of_buffer() {
        let bytes = [1_u8, 0, 0];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.u16(), Some(u16::from_ne_bytes([1, 0])));
        assert_eq!(reader.u32(), None);
        assert_eq!(reader.u8(), Some(0));
        assert_eq!(reader.u8(), None);
    }

    #[test]
    fn finish_patches_the_size_field() {
        let mut writer = Writer::with_capacity(32);
        writer.put_u32(0);
        writer.put_u32(0);
        writer.put_zeros(8);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 16);
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.u32(), Some(0));
        assert_eq!(reader.u32(), Some(16));
    }
}
