use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Subcommand, ValueEnum};
use devlink_device::{Device, DeviceConfig, ProtocolConfig};
use devlink_mux::{InputStreamCommunicator, MuxInputStreamCommunicator};
use devlink_transport::connect_tcp;
use tracing::{debug, error, info};

use crate::exit::{device_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod control;
pub mod fs;
pub mod monitor;
pub mod transfer;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show whether a program is running and how it last exited.
    Status,
    /// Show device firmware version information.
    Version,
    /// Start a program on the device.
    Start(StartArgs),
    /// Stop the running program.
    Stop,
    /// List a device directory.
    Ls(LsArgs),
    /// Read a device file.
    Read(ReadArgs),
    /// Write a device file.
    Write(WriteArgs),
    /// Delete a device file.
    Rm(PathArgs),
    /// Create a device directory.
    Mkdir(PathArgs),
    /// Delete a device directory.
    Rmdir(PathArgs),
    /// Erase the device filesystem.
    Format,
    /// Copy a device file or directory to the local filesystem.
    Pull(PullArgs),
    /// Copy the contents of a local directory to the device.
    Push(PushArgs),
    /// Upload only what changed in a local directory, deleting stale files.
    Sync(PushArgs),
    /// List firmware resources.
    ResourcesLs,
    /// Read a firmware resource.
    ResourcesRead(ResourceArgs),
    /// Read a configuration value.
    ConfigGet(ConfigGetArgs),
    /// Write a configuration value.
    ConfigSet(ConfigSetArgs),
    /// Erase a configuration value.
    ConfigErase(ConfigKeyArgs),
    /// Print program and log output until interrupted.
    Monitor(MonitorArgs),
}

/// How to reach the device.
#[derive(Debug, Clone)]
pub struct Connection {
    pub socket: String,
    pub timeout: Duration,
}

impl Connection {
    pub async fn open(&self) -> CliResult<Device> {
        let stream = connect_tcp(&self.socket)
            .await
            .map_err(|err| transport_error("connect failed", err))?;
        let config = DeviceConfig {
            protocol: ProtocolConfig {
                request_timeout: self.timeout,
            },
            ..DeviceConfig::default()
        };
        let device = Device::with_config(stream, config)
            .map_err(|err| device_error("session setup failed", err))?;

        forward_log(device.error_output(), |line| error!(target: "device", "{line}"))?;
        forward_log(device.log_output(), |line| info!(target: "device", "{line}"))?;
        forward_log(device.debug_output(), |line| debug!(target: "device", "{line}"))?;
        Ok(device)
    }
}

/// Emit each non-empty line arriving on a device log channel through `log`.
fn forward_log(stream: &MuxInputStreamCommunicator, log: fn(&str)) -> CliResult<()> {
    stream
        .on_data(Arc::new(move |data: Bytes| {
            String::from_utf8_lossy(&data)
                .lines()
                .filter(|line| !line.trim().is_empty())
                .for_each(log);
        }))
        .map_err(|err| device_error("log subscription failed", err.into()))
}

/// Run one command in its own device session.
///
/// The session is torn down (releasing the controller lock) whether or not
/// the command succeeded.
pub async fn run(command: Command, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let device = conn.open().await?;
    debug!(socket = %conn.socket, ?command, "running command");
    let result = dispatch(command, &device, format).await;
    device.destroy().await;
    result
}

async fn dispatch(command: Command, device: &Device, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Status => control::status(device, format).await,
        Command::Version => control::version(device, format).await,
        Command::Start(args) => control::start(device, args, format).await,
        Command::Stop => control::stop(device, format).await,
        Command::ConfigGet(args) => control::config_get(device, args, format).await,
        Command::ConfigSet(args) => control::config_set(device, args, format).await,
        Command::ConfigErase(args) => control::config_erase(device, args, format).await,
        Command::Ls(args) => fs::ls(device, args, format).await,
        Command::Read(args) => fs::read(device, args, format).await,
        Command::Write(args) => fs::write(device, args, format).await,
        Command::Rm(args) => fs::rm(device, args, format).await,
        Command::Mkdir(args) => fs::mkdir(device, args, format).await,
        Command::Rmdir(args) => fs::rmdir(device, args, format).await,
        Command::Format => fs::format(device, format).await,
        Command::ResourcesLs => fs::resources_ls(device, format).await,
        Command::ResourcesRead(args) => fs::resources_read(device, args, format).await,
        Command::Pull(args) => transfer::pull(device, args, format).await,
        Command::Push(args) => transfer::push(device, args, format).await,
        Command::Sync(args) => transfer::sync(device, args, format).await,
        Command::Monitor(args) => monitor::run(device, args, format).await,
    }
}

/// Take the controller lock before a command that changes device state.
pub(crate) async fn lock(device: &Device) -> CliResult<()> {
    device
        .controller()
        .lock()
        .await
        .map_err(|err| device_error("lock failed", err))
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Program entry point on the device.
    #[arg(default_value = "index.js")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Device path.
    pub path: String,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Device directory.
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Device file.
    pub path: String,
    /// Write to this local file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Device file.
    pub path: String,
    /// Raw string content.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read content from a local file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Device file or directory.
    pub from: String,
    /// Local destination. Directories must be new or empty.
    pub to: PathBuf,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Local directory.
    pub from: PathBuf,
    /// Device directory.
    pub to: String,
}

#[derive(Args, Debug)]
pub struct ResourceArgs {
    /// Resource name.
    pub name: String,
    /// Write to this local file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigKind {
    Int,
    Float,
    String,
}

#[derive(Args, Debug)]
pub struct ConfigKeyArgs {
    pub namespace: String,
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ConfigGetArgs {
    #[command(flatten)]
    pub key: ConfigKeyArgs,
    /// Stored value type.
    #[arg(long = "type", short = 't', value_enum, default_value = "string")]
    pub kind: ConfigKind,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    #[command(flatten)]
    pub key: ConfigKeyArgs,
    pub value: String,
    /// Value type to store.
    #[arg(long = "type", short = 't', value_enum, default_value = "string")]
    pub kind: ConfigKind,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Exit after printing N chunks.
    #[arg(long)]
    pub count: Option<usize>,
}

/// Parse durations like `5s`, `500ms` or a bare number of seconds.
pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
