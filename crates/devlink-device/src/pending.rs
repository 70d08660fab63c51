//! Single-slot reply correlation.
//!
//! Protocols on this link have no request ids: a reply is whatever arrives
//! next on the channel. Each protocol instance therefore allows one
//! outstanding request. [`PendingReply::arm`] claims the slot before the
//! request goes out and the returned [`ReplyGuard`] releases it on drop, so a
//! reply that shows up after its request timed out finds an empty slot and
//! is dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use devlink_mux::Consumer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{DeviceError, Result};

type Slot = Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reply slot for one protocol instance.
#[derive(Debug, Clone)]
pub struct PendingReply {
    name: &'static str,
    slot: Slot,
    cancel: CancellationToken,
}

impl PendingReply {
    /// `name` labels log lines and [`DeviceError::Busy`]. `cancel` fires when
    /// the link goes away and fails any waiting request.
    pub fn new(name: &'static str, cancel: CancellationToken) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(None)),
            cancel,
        }
    }

    /// Consumer to subscribe on the protocol's channel.
    ///
    /// Empty packets carry no command byte and are ignored.
    pub fn consumer(&self) -> Arc<dyn Consumer> {
        let slot = Arc::clone(&self.slot);
        let name = self.name;
        Arc::new(move |data: Bytes| {
            if data.is_empty() {
                trace!(protocol = name, "ignoring empty packet");
                return;
            }
            match lock(&slot).as_ref() {
                Some(tx) => {
                    let _ = tx.send(data);
                }
                None => trace!(protocol = name, len = data.len(), "dropping unsolicited reply"),
            }
        })
    }

    /// Claim the slot. Fails with [`DeviceError::Busy`] while another
    /// request holds it.
    pub fn arm(&self) -> Result<ReplyGuard> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return Err(DeviceError::Busy(self.name));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Ok(ReplyGuard {
            rx,
            slot: Arc::clone(&self.slot),
            cancel: self.cancel.clone(),
        })
    }

    /// Whether a request currently holds the slot.
    pub fn is_armed(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

/// An armed reply slot. Dropping it disarms the slot.
#[derive(Debug)]
pub struct ReplyGuard {
    rx: mpsc::UnboundedReceiver<Bytes>,
    slot: Slot,
    cancel: CancellationToken,
}

impl ReplyGuard {
    /// Wait for the next reply packet.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Bytes> {
        tokio::select! {
            biased;
            reply = self.rx.recv() => reply.ok_or(DeviceError::LinkClosed),
            _ = self.cancel.cancelled() => Err(DeviceError::LinkClosed),
            _ = tokio::time::sleep(timeout) => Err(DeviceError::Timeout(timeout)),
        }
    }
}

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        lock(&self.slot).take();
    }
}
