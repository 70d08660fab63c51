//! Byte-stuffed framing with channel addressing for device links.
//!
//! Every frame on the wire is:
//! - a `0x00` delimiter
//! - the COBS encoding of `channel`, the payload and a CRC-16 trailer
//! - a closing `0x00` delimiter
//!
//! COBS guarantees the body never contains `0x00`, so a receiver that joins
//! mid-stream (or loses bytes) resynchronizes at the next delimiter. The
//! CRC turns line noise into a dropped frame instead of a wrong one.

pub mod channel;
pub mod codec;
pub mod error;
pub mod packetizer;
pub mod serializer;

pub use channel::{
    ChannelRole, ChannelTable, CONTROLLER, DEBUG_LOG, ERROR_LOG, INFO_LOG, PROGRAM_ERROR,
    PROGRAM_INPUT, PROGRAM_OUTPUT, UPLOADER,
};
pub use codec::{
    decode_frame, encode_frame, max_encoded_len, Frame, CRC_SIZE, DELIMITER, FRAME_CAPACITY,
};
pub use error::{FrameError, Result};
pub use packetizer::Packetizer;
pub use serializer::Serializer;
