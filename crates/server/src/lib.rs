//! An embeddable runner for the `mirror-http` core.
//!
//! [`Server`] binds one or more listeners, optionally terminating TLS on each, and drives
//! every accepted connection with a shared [`Handler`](mirror_http::handler::Handler).
//! [`ServerConfig`] reads the same options from a TOML file.

mod config;
mod server;

pub use config::{ConfigError, IoMode, ListenerConfig, ServerConfig, TlsConfig};
pub use server::{Server, ServerBuildError, ServerBuilder, ServerError};
