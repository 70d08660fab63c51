use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Mux-level error (channel not active, mux destroyed).
    #[error("mux error: {0}")]
    Mux(#[from] devlink_mux::MuxError),

    /// The device stream ended or failed while a request was in flight.
    #[error("device link closed")]
    LinkClosed,

    /// No reply arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The device answered with a command other than the expected one.
    #[error("device replied {0}")]
    Protocol(String),

    /// A request is already waiting for its reply on this protocol instance.
    #[error("{0} request already in flight")]
    Busy(&'static str),

    /// A request argument cannot be encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The encoded request does not fit in one packet.
    #[error("request too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The reply could not be parsed.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// Local filesystem error.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Local directory traversal error.
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Higher-level failure (bad source path, non-empty destination).
    #[error("{0}")]
    Application(String),
}

impl DeviceError {
    /// Whether the error is a reply deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Timeout(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeviceError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
