//! An embeddable HTTP/1.1 and WebSocket server core
//!
//! This crate provides a small, hand-rolled HTTP/1.1 server with persistent connections and
//! an RFC 6455 WebSocket upgrade path, built on top of tokio. It is the transport layer of a
//! remote screen sharing application: control requests, file downloads and the live screen
//! stream all travel through the same connection supervisor.
//!
//! # Features
//!
//! - HTTP/1.1 request parsing with strict content-length accounting
//! - Keep-alive connections (no pipelining)
//! - Length-bounded request/response body streams
//! - Responses that freeze once their header has been sent
//! - WebSocket handshake, masking, fragmentation, ping/pong and close handshake
//! - Optional TLS through rustls
//! - A bounded diagnostics ring buffer for operational inspection
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//! use mirror_http::connection::{HttpConnection, HttpContext};
//! use mirror_http::handler::{Handler, HandlerError};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn call(&self, ctx: &mut HttpContext<'_>) -> Result<(), HandlerError> {
//!         info!(path = ctx.request().path(), "receive request");
//!         ctx.send_response("Hello World!\r\n").await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(Hello);
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let connection = HttpConnection::new(tcp_stream);
//!             if let Err(e) = connection.process(handler).await {
//!                 error!("service has error, cause {}, connection shutdown", e);
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`stream`]: length-bounded reader/writer windows over the raw transport
//! - [`protocol`]: request/response model and error types
//! - [`codec`]: header and WebSocket frame encoding/decoding
//! - [`connection`]: the connection supervisor and the handler-facing context
//! - [`websocket`]: the WebSocket session state machine
//! - [`handler`]: the request handler trait
//! - [`diagnostics`]: the process-wide rolling log
//! - [`tls`]: rustls based TLS acceptor
//!
//! # Limitations
//!
//! - HTTP/1.x only, no chunked transfer-encoding
//! - No WebSocket extensions
//! - Maximum header size: 16,000 bytes by default
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod diagnostics;
pub mod handler;
pub mod protocol;
pub mod stream;
pub mod tls;
pub mod websocket;

mod utils;
pub(crate) use utils::ensure;
