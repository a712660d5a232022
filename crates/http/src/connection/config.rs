use std::time::Duration;

use crate::codec::DEFAULT_MAX_HEADER_BYTES;
use crate::websocket::DEFAULT_MAX_MESSAGE_SIZE;

/// Per-connection limits and timeouts.
///
/// One instance is shared by all connections of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bounds the TLS handshake and the wait for a complete request header.
    pub header_timeout: Duration,
    /// Bounds each body read and write, reapplied before every request.
    pub body_timeout: Duration,
    pub max_header_size: usize,
    /// Largest message [`WebSocket::receive_message`](crate::websocket::WebSocket::receive_message) assembles.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            header_timeout: Duration::from_secs(10),
            body_timeout: Duration::from_secs(60),
            max_header_size: DEFAULT_MAX_HEADER_BYTES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
