//! In-memory device simulator for protocol tests.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use devlink_mux::{Mux, MuxInputPacketCommunicator, MuxOutputPacketCommunicator};

/// Two started muxes joined by an in-memory pipe: `(host, device)`.
pub(crate) fn link() -> (Arc<Mux>, Arc<Mux>) {
    let (host, device) = tokio::io::duplex(64 * 1024);
    let host = Arc::new(Mux::new(host));
    let device = Arc::new(Mux::new(device));
    host.start();
    device.start();
    (host, device)
}

pub(crate) fn host_side(
    host: &Arc<Mux>,
    channel: u8,
) -> (MuxInputPacketCommunicator, MuxOutputPacketCommunicator) {
    (
        MuxInputPacketCommunicator::new(Arc::clone(host), channel),
        MuxOutputPacketCommunicator::new(Arc::clone(host), channel),
    )
}

/// Answer every request on `channel` with the packets `handler` returns.
pub(crate) fn serve<F>(device: &Arc<Mux>, channel: u8, handler: F)
where
    F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let weak: Weak<Mux> = Arc::downgrade(device);
    device
        .subscribe_channel(
            channel,
            Arc::new(move |request: Bytes| {
                let Some(mux) = weak.upgrade() else { return };
                for reply in handler(&request) {
                    let mut packet = mux.build_packet(channel).unwrap();
                    assert_eq!(packet.write(&reply), reply.len());
                    packet.send().unwrap();
                }
            }),
        )
        .unwrap();
}
