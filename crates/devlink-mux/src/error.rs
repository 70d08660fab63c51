/// Errors that can occur in mux operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] devlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] devlink_frame::FrameError),

    /// The mux was destroyed or its writer stopped.
    #[error("mux destroyed")]
    Destroyed,

    /// The channel is outside the configured active set.
    #[error("channel {0} not in the active channel set")]
    UnsupportedChannel(u8),
}

pub type Result<T> = std::result::Result<T, MuxError>;
