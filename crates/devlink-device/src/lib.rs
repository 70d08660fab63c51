//! Device command protocols on top of a devlink mux.
//!
//! A [`Device`] wraps one byte stream and exposes the [`Controller`]
//! (program lifecycle, locking, configuration) and the [`Uploader`] (remote
//! filesystem). Both are request/response protocols with one outstanding
//! request each and a reply deadline. The [`sync`] module builds file
//! transfer and incremental sync on the uploader.

pub mod config;
pub mod controller;
pub mod device;
pub mod encoding;
pub mod error;
pub mod pending;
pub mod retry;
pub mod sync;
pub mod uploader;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ProtocolConfig, DEFAULT_REQUEST_TIMEOUT};
pub use controller::{ConfigType, Controller, ControllerCommand, ProgramStatus};
pub use device::{Device, DeviceConfig};
pub use error::{DeviceError, Result};
pub use pending::{PendingReply, ReplyGuard};
pub use retry::RetryPolicy;
pub use sync::{classify, SyncAction, SyncReport};
pub use uploader::{DirEntry, FileHash, ResourceInfo, Uploader, UploaderCommand};
