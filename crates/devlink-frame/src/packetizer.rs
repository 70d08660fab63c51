use tracing::trace;

use crate::codec::{decode_frame, max_encoded_len, Frame, CRC_SIZE, DELIMITER, FRAME_CAPACITY};

/// Accumulates received bytes into frames, one byte at a time.
///
/// Bytes between two delimiters are buffered up to a fixed bound (the
/// largest legal encoded frame). Back-to-back delimiters are skipped, so a
/// sender may open every frame with a delimiter to flush receiver noise.
#[derive(Debug)]
pub struct Packetizer {
    buf: Vec<u8>,
    limit: usize,
    complete: bool,
    taken: bool,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer {
    /// Create a packetizer sized for [`FRAME_CAPACITY`] frames.
    pub fn new() -> Self {
        let limit = max_encoded_len(FRAME_CAPACITY + CRC_SIZE);
        Self {
            buf: Vec::with_capacity(limit),
            limit,
            complete: false,
            taken: false,
        }
    }

    /// Feed one byte.
    ///
    /// Returns `false` when the byte was not accepted: either the buffer bound
    /// was hit or a completed frame is still waiting. Call [`reset`](Self::reset)
    /// before feeding more.
    pub fn put(&mut self, byte: u8) -> bool {
        if self.complete {
            return false;
        }

        if byte == DELIMITER {
            if !self.buf.is_empty() {
                self.complete = true;
            }
            return true;
        }

        if self.buf.len() >= self.limit {
            return false;
        }
        self.buf.push(byte);
        true
    }

    /// Whether a delimiter has closed a non-empty frame.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Decode the completed frame.
    ///
    /// Yields the frame at most once, and only after a delimiter completed it.
    /// Corrupted frames yield `None`.
    pub fn decode(&mut self) -> Option<Frame> {
        if !self.complete || self.taken {
            return None;
        }
        self.taken = true;

        match decode_frame(&self.buf) {
            Ok(frame) => Some(frame),
            Err(err) => {
                trace!(len = self.buf.len(), %err, "dropping undecodable frame");
                None
            }
        }
    }

    /// Discard any buffered bytes and start a new frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.complete = false;
        self.taken = false;
    }

    /// Number of buffered (encoded) bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;

    fn wire(channel: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(channel, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn feed(packetizer: &mut Packetizer, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if !packetizer.put(byte) {
                packetizer.reset();
                continue;
            }
            if packetizer.is_complete() {
                if let Some(frame) = packetizer.decode() {
                    frames.push(frame);
                }
                packetizer.reset();
            }
        }
        frames
    }

    #[test]
    fn read_single_frame() {
        let mut packetizer = Packetizer::new();
        let frames = feed(&mut packetizer, &wire(1, b"hello"));

        assert_eq!(frames, vec![Frame::new(1, b"hello".to_vec())]);
    }

    #[test]
    fn read_multiple_frames() {
        let mut bytes = wire(1, b"one");
        bytes.extend(wire(2, b"two"));
        bytes.extend(wire(3, b""));

        let frames = feed(&mut Packetizer::new(), &bytes);
        let got: Vec<(u8, &[u8])> = frames
            .iter()
            .map(|f| (f.channel, f.payload.as_ref()))
            .collect();
        assert_eq!(
            got,
            vec![(1, b"one".as_ref()), (2, b"two".as_ref()), (3, b"".as_ref())]
        );
    }

    #[test]
    fn decode_before_completion_returns_nothing() {
        let mut packetizer = Packetizer::new();
        let bytes = wire(5, b"partial");
        for &byte in &bytes[..bytes.len() - 1] {
            assert!(packetizer.put(byte));
        }
        assert!(!packetizer.is_complete());
        assert!(packetizer.decode().is_none());

        assert!(packetizer.put(DELIMITER));
        assert!(packetizer.is_complete());
        assert_eq!(packetizer.decode().unwrap().payload.as_ref(), b"partial");
    }

    #[test]
    fn decode_yields_frame_exactly_once() {
        let mut packetizer = Packetizer::new();
        for byte in wire(9, b"x") {
            packetizer.put(byte);
        }
        assert!(packetizer.decode().is_some());
        assert!(packetizer.decode().is_none());
    }

    #[test]
    fn rejects_bytes_until_reset_after_completion() {
        let mut packetizer = Packetizer::new();
        for byte in wire(9, b"x") {
            packetizer.put(byte);
        }
        assert!(!packetizer.put(0x42));
        packetizer.reset();
        assert!(packetizer.put(0x42));
        assert_eq!(packetizer.buffered(), 1);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut packetizer = Packetizer::new();
        let mut accepted = 0usize;
        while packetizer.put(0x11) {
            accepted += 1;
            assert!(accepted <= 10_000, "packetizer never applied its bound");
        }
        assert_eq!(accepted, max_encoded_len(FRAME_CAPACITY + CRC_SIZE));
    }

    #[test]
    fn resynchronizes_after_mid_stream_start() {
        let full = wire(4, b"first");
        let mut bytes = full[3..].to_vec();
        bytes.extend(wire(4, b"second"));

        let frames = feed(&mut Packetizer::new(), &bytes);
        assert_eq!(frames, vec![Frame::new(4, b"second".to_vec())]);
    }

    #[test]
    fn resynchronizes_after_garbage_and_overflow() {
        let mut bytes = vec![0x7F; 600];
        bytes.extend(wire(2, b"after-noise"));

        let frames = feed(&mut Packetizer::new(), &bytes);
        assert_eq!(frames, vec![Frame::new(2, b"after-noise".to_vec())]);
    }

    #[test]
    fn corrupted_frame_is_dropped_and_next_survives() {
        let mut bad = wire(1, b"corrupt-me");
        bad[5] ^= 0x01;
        let mut bytes = bad;
        bytes.extend(wire(1, b"intact"));

        let frames = feed(&mut Packetizer::new(), &bytes);
        assert_eq!(frames, vec![Frame::new(1, b"intact".to_vec())]);
    }
}
