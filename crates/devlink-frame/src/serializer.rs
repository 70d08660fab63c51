use bytes::{Bytes, BytesMut};

use crate::codec::{encode_frame, max_encoded_len, CRC_SIZE, FRAME_CAPACITY};
use crate::error::Result;

/// Accumulates the payload of one outgoing frame.
///
/// The capacity counts every byte of the frame body, so a caller that also
/// needs the channel marker must stop one byte short of it.
#[derive(Debug)]
pub struct Serializer {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    /// Create a serializer with [`FRAME_CAPACITY`] bytes of room.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_CAPACITY),
            capacity: FRAME_CAPACITY,
        }
    }

    /// Maximum number of bytes this serializer accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes accepted so far.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes have been accepted.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard accumulated bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Append one byte. Returns `false` once the serializer is full.
    pub fn put(&mut self, byte: u8) -> bool {
        if self.buf.len() >= self.capacity {
            return false;
        }
        self.buf.push(byte);
        true
    }

    /// Encode the accumulated bytes as a frame on `channel`.
    ///
    /// Fails if the payload plus channel marker does not fit a frame. The
    /// accumulated bytes are kept until [`reset`](Self::reset).
    pub fn finalize(&self, channel: u8) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(max_encoded_len(1 + self.buf.len() + CRC_SIZE) + 2);
        encode_frame(channel, &self.buf, &mut dst)?;
        Ok(dst.freeze())
    }
}
