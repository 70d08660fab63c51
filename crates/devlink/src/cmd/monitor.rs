use std::sync::Arc;

use bytes::Bytes;
use devlink_device::Device;
use devlink_frame::ChannelRole;
use devlink_mux::InputStreamCommunicator;
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::MonitorArgs;
use crate::exit::{device_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_stream_chunk, OutputFormat};

enum Event {
    Data(u8, Bytes),
    Closed,
    Failed(String),
}

pub async fn run(device: &Device, args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channels = *device.channels();

    let streams = [
        (device.program_output(), ChannelRole::ProgramOutput),
        (device.program_error(), ChannelRole::ProgramError),
        (device.error_output(), ChannelRole::ErrorLog),
        (device.log_output(), ChannelRole::InfoLog),
        (device.debug_output(), ChannelRole::DebugLog),
    ];
    for (stream, role) in streams {
        let tx = tx.clone();
        let channel = channels.channel(role);
        stream
            .on_data(Arc::new(move |data: Bytes| {
                let _ = tx.send(Event::Data(channel, data));
            }))
            .map_err(|err| device_error("subscribe failed", err.into()))?;
    }
    let end_tx = tx.clone();
    device.on_end(move || {
        let _ = end_tx.send(Event::Closed);
    });
    device.on_error(move |err| {
        let _ = tx.send(Event::Failed(err.to_string()));
    });

    info!("monitoring device output, press Ctrl-C to stop");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0usize;

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                return signal
                    .map(|()| SUCCESS)
                    .map_err(|err| {
                        CliError::new(INTERNAL, format!("signal handler failed: {err}"))
                    });
            }
            event = rx.recv() => match event {
                Some(Event::Data(channel, data)) => {
                    print_stream_chunk(&channels, channel, &data, format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        return Ok(SUCCESS);
                    }
                }
                Some(Event::Closed) | None => {
                    info!("device closed the link");
                    return Ok(SUCCESS);
                }
                Some(Event::Failed(msg)) => {
                    return Err(CliError::new(TRANSPORT_ERROR, format!("link failed: {msg}")));
                }
            },
        }
    }
}
