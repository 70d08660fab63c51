use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Default TCP port of the device's serial-socket bridge.
pub const DEFAULT_PORT: u16 = 17531;

/// Parse a `[host:]port` string. A bare port means `localhost`.
pub fn parse_socket_addr(value: &str) -> Result<(String, u16)> {
    let value = value.trim();
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => (host, port),
        Some(_) => return Err(TransportError::InvalidAddress(value.to_string())),
        None => ("localhost", value),
    };

    let port: u16 = port
        .parse()
        .map_err(|_| TransportError::InvalidAddress(value.to_string()))?;
    if port == 0 {
        return Err(TransportError::InvalidAddress(value.to_string()));
    }

    Ok((host.to_string(), port))
}

/// Connect to a device exposed over TCP (`[host:]port`).
pub async fn connect_tcp(addr: &str) -> Result<TcpStream> {
    let (host, port) = parse_socket_addr(addr)?;
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|source| TransportError::Connect {
            addr: format!("{host}:{port}"),
            source,
        })?;
    stream.set_nodelay(true)?;
    debug!(%host, port, "connected to device socket");
    Ok(stream)
}
