use bytes::Bytes;
use devlink_frame::Serializer;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{MuxError, Result};

/// A single outgoing frame under construction.
///
/// Built with [`Mux::build_packet`](crate::Mux::build_packet) and consumed by
/// [`send`](Self::send). Bytes past the mux's `max_packet_size()` are refused.
#[derive(Debug)]
pub struct Packet {
    channel: u8,
    serializer: Serializer,
    limit: usize,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Packet {
    pub(crate) fn new(channel: u8, limit: usize, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            channel,
            serializer: Serializer::new(),
            limit,
            outbound,
        }
    }

    /// The channel this packet will be sent on.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Append one byte. Returns `false` if the packet is full.
    pub fn put(&mut self, byte: u8) -> bool {
        if self.serializer.size() >= self.limit {
            return false;
        }
        self.serializer.put(byte)
    }

    /// Append as many bytes of `data` as fit; returns how many were taken.
    pub fn write(&mut self, data: &[u8]) -> usize {
        data.iter().take_while(|&&byte| self.put(byte)).count()
    }

    /// Remaining room in bytes.
    pub fn space(&self) -> usize {
        self.limit.saturating_sub(self.serializer.size())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.serializer.size()
    }

    pub fn is_empty(&self) -> bool {
        self.serializer.is_empty()
    }

    /// Commit the packet as one frame.
    ///
    /// Frames are queued for the mux's writer in call order and written
    /// whole, so concurrent senders never interleave on the wire.
    pub fn send(self) -> Result<()> {
        let frame = self.serializer.finalize(self.channel)?;
        trace!(
            channel = self.channel,
            len = self.serializer.size(),
            "queueing frame"
        );
        self.outbound
            .send(frame)
            .map_err(|_| MuxError::Destroyed)
    }
}
