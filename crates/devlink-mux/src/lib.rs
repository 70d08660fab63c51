//! Channel multiplexer over a single device byte stream.
//!
//! A [`Mux`] owns one duplex stream. Inbound bytes are packetized and routed
//! by channel to a subscribed [`Consumer`] or to a global observer. Outbound
//! data is built with a [`Packet`] and committed as exactly one frame.
//!
//! The communicator adapters in [`communicator`] narrow a `Mux` plus a channel
//! number down to what protocol code needs.

pub mod communicator;
pub mod error;
pub mod mux;
pub mod packet;

pub use communicator::{
    InputPacketCommunicator, InputStreamCommunicator, MuxInputPacketCommunicator,
    MuxInputStreamCommunicator, MuxOutputPacketCommunicator, MuxOutputStreamCommunicator,
    OutputPacketCommunicator, OutputStreamCommunicator,
};
pub use error::{MuxError, Result};
pub use mux::{Consumer, Mux, MuxConfig};
pub use packet::Packet;
