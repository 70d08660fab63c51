use tokio::io::{AsyncRead, AsyncWrite};

/// An ordered, bidirectional byte stream to a device.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type that can be
/// moved into a background task, so `TcpStream`, `DuplexStream` and serial
/// adapters all qualify without glue code.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased duplex stream.
pub type BoxedDuplex = Box<dyn Duplex>;
