//! Narrow views of a [`Mux`] bound to one channel.
//!
//! Protocol code depends on these traits, not on the mux, so a controller
//! only ever sees "send a packet" and "tell me about incoming packets".

use std::sync::Arc;

use crate::error::Result;
use crate::mux::{Consumer, Mux};
use crate::packet::Packet;

/// Builds outgoing packets on a fixed channel.
pub trait OutputPacketCommunicator: Send + Sync {
    fn build_packet(&self) -> Result<Packet>;
    fn max_packet_size(&self) -> usize;
}

/// Delivers incoming packets from a fixed channel.
pub trait InputPacketCommunicator: Send + Sync {
    fn on_data(&self, consumer: Arc<dyn Consumer>) -> Result<()>;
}

/// Writes an unframed byte stream, split into packets as needed.
pub trait OutputStreamCommunicator: Send + Sync {
    fn put(&self, byte: u8) -> Result<()>;
    fn write(&self, data: &[u8]) -> Result<()>;
}

/// Delivers an unframed byte stream in arbitrary chunks.
pub trait InputStreamCommunicator: Send + Sync {
    fn on_data(&self, consumer: Arc<dyn Consumer>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MuxOutputPacketCommunicator {
    mux: Arc<Mux>,
    channel: u8,
}

impl MuxOutputPacketCommunicator {
    pub fn new(mux: Arc<Mux>, channel: u8) -> Self {
        Self { mux, channel }
    }
}

impl OutputPacketCommunicator for MuxOutputPacketCommunicator {
    fn build_packet(&self) -> Result<Packet> {
        self.mux.build_packet(self.channel)
    }

    fn max_packet_size(&self) -> usize {
        self.mux.max_packet_size()
    }
}

#[derive(Debug, Clone)]
pub struct MuxInputPacketCommunicator {
    mux: Arc<Mux>,
    channel: u8,
}

impl MuxInputPacketCommunicator {
    pub fn new(mux: Arc<Mux>, channel: u8) -> Self {
        Self { mux, channel }
    }
}

impl InputPacketCommunicator for MuxInputPacketCommunicator {
    fn on_data(&self, consumer: Arc<dyn Consumer>) -> Result<()> {
        self.mux.subscribe_channel(self.channel, consumer)
    }
}

#[derive(Debug, Clone)]
pub struct MuxOutputStreamCommunicator {
    mux: Arc<Mux>,
    channel: u8,
}

impl MuxOutputStreamCommunicator {
    pub fn new(mux: Arc<Mux>, channel: u8) -> Self {
        Self { mux, channel }
    }
}

impl OutputStreamCommunicator for MuxOutputStreamCommunicator {
    fn put(&self, byte: u8) -> Result<()> {
        let mut packet = self.mux.build_packet(self.channel)?;
        packet.put(byte);
        packet.send()
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.mux.max_packet_size()) {
            let mut packet = self.mux.build_packet(self.channel)?;
            packet.write(chunk);
            packet.send()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MuxInputStreamCommunicator {
    mux: Arc<Mux>,
    channel: u8,
}

impl MuxInputStreamCommunicator {
    pub fn new(mux: Arc<Mux>, channel: u8) -> Self {
        Self { mux, channel }
    }
}

impl InputStreamCommunicator for MuxInputStreamCommunicator {
    fn on_data(&self, consumer: Arc<dyn Consumer>) -> Result<()> {
        self.mux.subscribe_channel(self.channel, consumer)
    }
}
