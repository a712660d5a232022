use std::io;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// A byte stream a connection can be served over.
///
/// Besides the async read and write halves, the connection needs one socket option:
/// after a WebSocket upgrade, send coalescing is switched off for low latency.
/// Transports without such an option keep the default no-op.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        let _ = nodelay;
        Ok(())
    }
}

impl Transport for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }
}

impl Transport for DuplexStream {}
