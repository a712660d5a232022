//! HTTP connection handling.
//!
//! - [`HttpConnection`] drives the request loop of one connection
//! - [`HttpContext`] is what a handler sees of a single exchange
//! - [`ConnectionConfig`] holds the timeouts and size limits every connection applies

mod config;
mod context;
mod http_connection;

pub use config::ConnectionConfig;
pub use context::HttpContext;
pub use http_connection::HttpConnection;
