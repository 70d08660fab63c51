/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame body is not valid COBS.
    #[error("invalid COBS encoding at offset {offset}")]
    InvalidEncoding { offset: usize },

    /// The decoded body is too short to hold a channel byte and checksum.
    #[error("frame too short ({len} bytes)")]
    TooShort { len: usize },

    /// The checksum trailer does not match the frame contents.
    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Checksum { expected: u16, actual: u16 },

    /// The payload exceeds the frame capacity.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
