use std::fmt;
use std::io;

use devlink_device::DeviceError;
use devlink_mux::MuxError;
use devlink_transport::TransportError;

// sysexits-style exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidAddress(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Mux(MuxError::Transport(err)) => transport_error(context, err),
        DeviceError::Mux(MuxError::UnsupportedChannel(_)) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        DeviceError::Mux(_) | DeviceError::LinkClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        DeviceError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        DeviceError::InvalidArgument(_) | DeviceError::PayloadTooLarge { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        DeviceError::MalformedReply(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        DeviceError::Io { path, source } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
