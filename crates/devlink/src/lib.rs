//! Framed, multiplexed command link to embedded devices.
//!
//! devlink carries several logical channels over one byte stream (serial
//! port, TCP socket) and runs a controller and an uploader protocol on top.
//!
//! # Crate Structure
//!
//! - [`transport`]: the stream abstraction and a TCP connector
//! - [`frame`]: COBS framing with CRC, the packetizer and the channel table
//! - [`mux`]: channel multiplexer and per-channel communicators
//! - [`device`]: controller, uploader and sync helpers (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use devlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use devlink_frame::*;
}

/// Re-export mux types.
pub mod mux {
    pub use devlink_mux::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use devlink_device::*;
}
