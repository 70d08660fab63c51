use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_3740};

use crate::error::{FrameError, Result};

/// Frame delimiter. Never appears inside an encoded body.
pub const DELIMITER: u8 = 0x00;

/// Maximum frame body (channel byte + payload) in bytes.
pub const FRAME_CAPACITY: usize = 255;

/// Checksum trailer size.
pub const CRC_SIZE: usize = 2;

/// Longest COBS run: one code byte covers at most 254 data bytes.
const MAX_RUN: usize = 0xFE;

/// A decoded frame with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame, delimiters included.
    pub fn wire_size(&self) -> usize {
        max_encoded_len(1 + self.payload.len() + CRC_SIZE) + 2
    }
}

/// Upper bound of the COBS encoding of `len` raw bytes.
pub const fn max_encoded_len(len: usize) -> usize {
    len + len / MAX_RUN + 1
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬───────────────────────────────────────────────┬──────┐
/// │ 0x00 │ COBS( channel │ payload │ crc16 (BE) )          │ 0x00 │
/// └──────┴───────────────────────────────────────────────┴──────┘
/// ```
pub fn encode_frame(channel: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if 1 + payload.len() > FRAME_CAPACITY {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: FRAME_CAPACITY - 1,
        });
    }

    let mut body = Vec::with_capacity(1 + payload.len() + CRC_SIZE);
    body.push(channel);
    body.extend_from_slice(payload);
    let crc = crc16(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    dst.reserve(max_encoded_len(body.len()) + 2);
    dst.put_u8(DELIMITER);
    cobs_encode(&body, dst);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode one frame body (the bytes between two delimiters).
pub fn decode_frame(encoded: &[u8]) -> Result<Frame> {
    let body = cobs_decode(encoded)?;
    if body.len() < 1 + CRC_SIZE {
        return Err(FrameError::TooShort { len: body.len() });
    }

    let (content, trailer) = body.split_at(body.len() - CRC_SIZE);
    let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
    let actual = crc16(content);
    if expected != actual {
        return Err(FrameError::Checksum { expected, actual });
    }

    Ok(Frame {
        channel: content[0],
        payload: Bytes::copy_from_slice(&content[1..]),
    })
}

fn cobs_encode(src: &[u8], dst: &mut BytesMut) {
    let mut code_at = dst.len();
    dst.put_u8(0);
    let mut code: u8 = 1;

    for &byte in src {
        if byte == DELIMITER {
            dst[code_at] = code;
            code_at = dst.len();
            dst.put_u8(0);
            code = 1;
            continue;
        }

        dst.put_u8(byte);
        code += 1;
        if usize::from(code) == MAX_RUN + 1 {
            dst[code_at] = code;
            code_at = dst.len();
            dst.put_u8(0);
            code = 1;
        }
    }

    dst[code_at] = code;
}

fn cobs_decode(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0usize;

    while pos < src.len() {
        let code = usize::from(src[pos]);
        if code == 0 {
            return Err(FrameError::InvalidEncoding { offset: pos });
        }
        pos += 1;

        let run = code - 1;
        let end = pos + run;
        if end > src.len() {
            return Err(FrameError::InvalidEncoding { offset: pos - 1 });
        }
        if let Some(zero) = src[pos..end].iter().position(|b| *b == DELIMITER) {
            return Err(FrameError::InvalidEncoding { offset: pos + zero });
        }
        out.extend_from_slice(&src[pos..end]);
        pos = end;

        if code != MAX_RUN + 1 && pos < src.len() {
            out.push(0);
        }
    }

    Ok(out)
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
