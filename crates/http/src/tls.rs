//! TLS termination with rustls.
//!
//! A [`TlsAcceptor`] is built once per listener from a PEM certificate chain and private
//! key, then shared read-only by every connection of that listener. Only server
//! authentication is supported; client certificates are not requested.

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::debug;

use crate::protocol::ParseError;
use crate::stream::Transport;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("no certificate found in {path}")]
    NoCertificates { path: String },

    #[error("no private key found in {path}")]
    NoPrivateKey { path: String },

    #[error("invalid tls configuration: {source}")]
    Config {
        #[from]
        source: rustls::Error,
    },
}

impl TlsError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }
}

#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor")
            .field("alpn_protocols", &self.inner.config().alpn_protocols)
            .finish_non_exhaustive()
    }
}

impl TlsAcceptor {
    /// Loads a PEM certificate chain and a PEM private key (PKCS#1, PKCS#8 or SEC1).
    pub fn from_pem_files<P: AsRef<Path>, K: AsRef<Path>>(certificate: P, private_key: K) -> Result<Self, TlsError> {
        let certificate = certificate.as_ref();
        let private_key = private_key.as_ref();

        let certs = load_certs(certificate)?;
        let key = load_private_key(private_key)?;
        debug!(certificate = %certificate.display(), chain = certs.len(), "loaded tls certificate");

        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self::from_config(Arc::new(config)))
    }

    pub fn from_config(config: Arc<ServerConfig>) -> Self {
        Self { inner: tokio_rustls::TlsAcceptor::from(config) }
    }

    /// Performs the server side handshake, bounded by `timeout`.
    pub async fn accept(&self, tcp_stream: TcpStream, timeout: Duration) -> Result<TlsStream<TcpStream>, ParseError> {
        tokio::time::timeout(timeout, self.inner.accept(tcp_stream))
            .await
            .map_err(|_elapsed| ParseError::Timeout(timeout))?
            .map_err(ParseError::io)
    }
}

impl Transport for TlsStream<TcpStream> {
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.get_ref().0.set_nodelay(nodelay)
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::io(path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::io(path, e))?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates { path: path.display().to_string() });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::io(path, e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TlsError::io(path, e))?
        .ok_or_else(|| TlsError::NoPrivateKey { path: path.display().to_string() })
}
