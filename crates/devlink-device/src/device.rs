use std::sync::Arc;

use devlink_frame::{ChannelRole, ChannelTable};
use devlink_mux::{
    Mux, MuxConfig, MuxInputPacketCommunicator, MuxInputStreamCommunicator,
    MuxOutputPacketCommunicator, MuxOutputStreamCommunicator,
};
use devlink_transport::{Duplex, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProtocolConfig;
use crate::controller::Controller;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::uploader::Uploader;

/// Device session configuration.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub channels: ChannelTable,
    pub protocol: ProtocolConfig,
    pub lock_policy: RetryPolicy,
    /// Refuse traffic on channels outside `channels`.
    pub restrict_channels: bool,
}

/// A session with one device over one byte stream.
///
/// Owns the mux and binds the controller, the uploader and the program and
/// log streams to their channels. Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct Device {
    mux: Arc<Mux>,
    channels: ChannelTable,
    cancel: CancellationToken,
    controller: Controller,
    uploader: Uploader,
    program_output: MuxInputStreamCommunicator,
    program_input: MuxOutputStreamCommunicator,
    program_error: MuxInputStreamCommunicator,
    error_output: MuxInputStreamCommunicator,
    log_output: MuxInputStreamCommunicator,
    debug_output: MuxInputStreamCommunicator,
}

impl Device {
    pub fn new<S: Duplex>(stream: S) -> Result<Self> {
        Self::with_config(stream, DeviceConfig::default())
    }

    pub fn with_config<S: Duplex>(stream: S, config: DeviceConfig) -> Result<Self> {
        let channels = config.channels;
        let mux_config = MuxConfig {
            channels: config.restrict_channels.then(|| channels.active_set()),
        };
        let mux = Arc::new(Mux::with_config(stream, mux_config));
        let cancel = CancellationToken::new();

        let input_stream =
            |role| MuxInputStreamCommunicator::new(Arc::clone(&mux), channels.channel(role));
        let program_output = input_stream(ChannelRole::ProgramOutput);
        let program_error = input_stream(ChannelRole::ProgramError);
        let error_output = input_stream(ChannelRole::ErrorLog);
        let log_output = input_stream(ChannelRole::InfoLog);
        let debug_output = input_stream(ChannelRole::DebugLog);
        let program_input = MuxOutputStreamCommunicator::new(
            Arc::clone(&mux),
            channels.channel(ChannelRole::ProgramInput),
        );

        let controller = Controller::with_config(
            &MuxInputPacketCommunicator::new(Arc::clone(&mux), channels.controller),
            MuxOutputPacketCommunicator::new(Arc::clone(&mux), channels.controller),
            cancel.clone(),
            config.protocol,
        )?
        .with_lock_policy(config.lock_policy);

        let uploader = Uploader::with_config(
            &MuxInputPacketCommunicator::new(Arc::clone(&mux), channels.uploader),
            MuxOutputPacketCommunicator::new(Arc::clone(&mux), channels.uploader),
            cancel.clone(),
            config.protocol,
        )?;

        let device = Self {
            mux,
            channels,
            cancel,
            controller,
            uploader,
            program_output,
            program_input,
            program_error,
            error_output,
            log_output,
            debug_output,
        };
        device.on_error(|_| {});
        device.on_end(|| {});
        device.mux.start();
        debug!("device session started");
        Ok(device)
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Program stdout.
    pub fn program_output(&self) -> &MuxInputStreamCommunicator {
        &self.program_output
    }

    /// Program stdin.
    pub fn program_input(&self) -> &MuxOutputStreamCommunicator {
        &self.program_input
    }

    /// Program stderr.
    pub fn program_error(&self) -> &MuxInputStreamCommunicator {
        &self.program_error
    }

    pub fn error_output(&self) -> &MuxInputStreamCommunicator {
        &self.error_output
    }

    pub fn log_output(&self) -> &MuxInputStreamCommunicator {
        &self.log_output
    }

    pub fn debug_output(&self) -> &MuxInputStreamCommunicator {
        &self.debug_output
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    /// Whether the link has failed or been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Called once when the link fails. In-flight requests fail first.
    pub fn on_error(&self, callback: impl Fn(&TransportError) + Send + Sync + 'static) {
        let cancel = self.cancel.clone();
        self.mux.on_error(move |err| {
            cancel.cancel();
            callback(err);
        });
    }

    /// Called once when the device closes the link. In-flight requests fail
    /// first.
    pub fn on_end(&self, callback: impl Fn() + Send + Sync + 'static) {
        let cancel = self.cancel.clone();
        self.mux.on_end(move || {
            cancel.cancel();
            callback();
        });
    }

    /// Release the controller lock and close the link.
    ///
    /// The unlock is bounded by the request timeout; teardown happens whether
    /// or not it succeeds.
    pub async fn destroy(&self) {
        if !self.is_closed() {
            match self.controller.unlock().await {
                Ok(()) => debug!("controller unlocked"),
                Err(err) => debug!(%err, "unlock before teardown failed"),
            }
        }
        self.cancel.cancel();
        self.mux.destroy().await;
    }
}
