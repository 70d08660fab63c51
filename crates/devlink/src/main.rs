mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{parse_timeout, Command, Connection};
use crate::exit::INTERNAL;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "devlink",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DEVLINK_BUILD_TARGET"), ")"),
    about = "Control devices over a framed, multiplexed link"
)]
struct Cli {
    /// Device address as host:port, or a bare port on localhost.
    #[arg(
        long,
        short = 's',
        value_name = "ADDR",
        env = "DEVLINK_SOCKET",
        default_value = "127.0.0.1:17531",
        global = true
    )]
    socket: String,

    /// Reply timeout for device requests (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "5s", global = true)]
    timeout: String,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = parse_timeout(&cli.timeout).and_then(|timeout| {
        let conn = Connection {
            socket: cli.socket,
            timeout,
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| exit::CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
        runtime.block_on(cmd::run(cli.command, &conn, format))
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
