//! Duplex byte-stream transport for devlink.
//!
//! The multiplexer above this layer only needs an ordered, bidirectional
//! byte stream. Anything implementing [`Duplex`] qualifies: a TCP socket to
//! a serial bridge, an in-memory pipe in tests, or a serial port adapter
//! supplied by the caller.
//!
//! This crate ships the [`Duplex`] contract and a TCP connector. Serial port
//! setup is left to the caller.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{connect_tcp, parse_socket_addr, DEFAULT_PORT};
pub use traits::{BoxedDuplex, Duplex};
