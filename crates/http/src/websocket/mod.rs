//! WebSocket support (RFC 6455).
//!
//! - [`handshake`]: the accept key and the sub-protocol check of the opening handshake
//! - [`WebSocket`]: a session over an upgraded connection, with frame-level
//!   [`receive`](WebSocket::receive), message-level
//!   [`receive_message`](WebSocket::receive_message), [`send`](WebSocket::send) and the
//!   close handshake
//!
//! Extensions (compression) are not supported; frames with reserved bits set are rejected.

pub mod handshake;
mod session;

pub(crate) use session::WebSocketState;
pub use session::{CloseStatus, DEFAULT_MAX_MESSAGE_SIZE, MessageType, ReceiveResult, SessionState, WebSocket};
