use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mirror_http::connection::{ConnectionConfig, HttpConnection};
use mirror_http::diagnostics::DiagnosticsLog;
use mirror_http::handler::{Handler, NoHandler};
use mirror_http::tls::{TlsAcceptor, TlsError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{IoMode, ListenerConfig, ServerConfig};

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,

    #[error("failed to set up tls for {address}: {source}")]
    Tls { address: String, source: TlsError },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("server already started")]
    AlreadyStarted,
}

pub struct ServerBuilder {
    listeners: Vec<ListenerConfig>,
    connection: ConnectionConfig,
    io_mode: IoMode,
    diagnostics: Option<Arc<DiagnosticsLog>>,
    handler: Option<Arc<dyn Handler>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            listeners: Vec::new(),
            connection: ConnectionConfig::default(),
            io_mode: IoMode::default(),
            diagnostics: None,
            handler: None,
        }
    }

    /// Adds a plaintext listener.
    pub fn address<A: Into<String>>(mut self, address: A) -> Self {
        self.listeners.push(ListenerConfig::plain(address));
        self
    }

    /// Adds a listener terminating TLS with a PEM certificate chain and private key.
    pub fn tls_address<A: Into<String>>(mut self, address: A, certificate: PathBuf, private_key: PathBuf) -> Self {
        self.listeners.push(ListenerConfig::tls(address, certificate, private_key));
        self
    }

    /// Applies every option of a configuration file, listeners included.
    pub fn config(mut self, config: &ServerConfig) -> Self {
        self.listeners.extend(config.listeners.iter().cloned());
        self.connection = config.connection_config();
        self.io_mode = config.io_mode;
        if self.diagnostics.is_none() {
            self.diagnostics = Some(Arc::new(DiagnosticsLog::with_capacity(config.diagnostics_capacity)));
        }
        self
    }

    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.connection.header_timeout = timeout;
        self
    }

    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.connection.body_timeout = timeout;
        self
    }

    pub fn max_header_size(mut self, max_header_size: usize) -> Self {
        self.connection.max_header_size = max_header_size;
        self
    }

    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.connection.max_message_size = max_message_size;
        self
    }

    pub fn io_mode(mut self, io_mode: IoMode) -> Self {
        self.io_mode = io_mode;
        self
    }

    /// Shares a diagnostics log, e.g. with a handler serving its dump.
    pub fn diagnostics(mut self, diagnostics: Arc<DiagnosticsLog>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Loads the TLS material of every listener. Without a handler every request is answered 503.
    pub fn build(self) -> Result<Server, ServerBuildError> {
        if self.listeners.is_empty() {
            return Err(ServerBuildError::MissingAddress);
        }

        let listeners = self
            .listeners
            .into_iter()
            .map(|listener| {
                let acceptor = match &listener.tls {
                    Some(tls) => Some(
                        TlsAcceptor::from_pem_files(&tls.certificate, &tls.private_key)
                            .map_err(|source| ServerBuildError::Tls { address: listener.address.clone(), source })?,
                    ),
                    None => None,
                };
                Ok(Listener { address: listener.address, acceptor })
            })
            .collect::<Result<Vec<_>, ServerBuildError>>()?;

        let handler: Arc<dyn Handler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(NoHandler),
        };
        let shared = Shared {
            handler,
            config: Arc::new(self.connection),
            diagnostics: self.diagnostics.unwrap_or_else(|| Arc::new(DiagnosticsLog::new())),
            io_mode: self.io_mode,
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            shutdown: CancellationToken::new(),
        };

        Ok(Server { listeners, shared: Arc::new(shared), registry: Mutex::new(Registry::default()) })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("listeners", &self.listeners)
            .field("connection", &self.connection)
            .field("io_mode", &self.io_mode)
            .finish_non_exhaustive()
    }
}

struct Listener {
    address: String,
    acceptor: Option<TlsAcceptor>,
}

/// State every connection of the server shares.
struct Shared {
    handler: Arc<dyn Handler>,
    config: Arc<ConnectionConfig>,
    diagnostics: Arc<DiagnosticsLog>,
    io_mode: IoMode,
    active: AtomicUsize,
    idle: Notify,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Registry {
    accept_loops: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
    started: bool,
}

/// A running set of listeners.
///
/// [`start`](Server::start) binds every listener and returns once they accept
/// connections; [`stop`](Server::stop) closes the listeners, closes idle connections and
/// waits for in-flight exchanges to finish.
pub struct Server {
    listeners: Vec<Listener>,
    shared: Arc<Shared>,
    registry: Mutex<Registry>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addresses", &self.listeners.iter().map(|listener| &listener.address).collect::<Vec<_>>())
            .field("io_mode", &self.shared.io_mode)
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds every listener and spawns its accept loop.
    ///
    /// Returns the bound addresses in listener order. Listeners bound before a failing one
    /// keep running until [`stop`](Server::stop).
    pub async fn start(&self) -> Result<Vec<SocketAddr>, ServerError> {
        {
            let mut registry = self.registry();
            if registry.started {
                return Err(ServerError::AlreadyStarted);
            }
            registry.started = true;
        }

        let mut local_addrs = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            let tcp_listener = TcpListener::bind(listener.address.as_str())
                .await
                .map_err(|source| ServerError::Bind { address: listener.address.clone(), source })?;
            let local_addr = tcp_listener.local_addr().map_err(|source| ServerError::Bind { address: listener.address.clone(), source })?;
            info!(%local_addr, tls = listener.acceptor.is_some(), "start listening");

            let accept_loop = tokio::spawn(accept_loop(tcp_listener, listener.acceptor.clone(), Arc::clone(&self.shared)));
            let mut registry = self.registry();
            registry.accept_loops.push(accept_loop);
            registry.local_addrs.push(local_addr);
            local_addrs.push(local_addr);
        }

        Ok(local_addrs)
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.registry().local_addrs.clone()
    }

    /// The number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsLog> {
        &self.shared.diagnostics
    }

    /// Stops accepting, closes idle connections and waits until every connection is done.
    pub async fn stop(&self) {
        self.shared.shutdown.cancel();

        let accept_loops = std::mem::take(&mut self.registry().accept_loops);
        for accept_loop in accept_loops {
            if let Err(e) = accept_loop.await {
                error!(cause = %e, "accept loop failed");
            }
        }

        loop {
            let idle = self.shared.idle.notified();
            let active = self.active_connections();
            if active == 0 {
                break;
            }
            debug!(active, "waiting for connections to finish");
            idle.await;
        }
        info!("server stopped");
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn accept_loop(tcp_listener: TcpListener, acceptor: Option<TlsAcceptor>, shared: Arc<Shared>) {
    loop {
        let (tcp_stream, remote_addr) = select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                info!("stop accepting connections");
                return;
            }
            accepted = tcp_listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        let guard = ConnectionGuard::new(Arc::clone(&shared));
        let acceptor = acceptor.clone();
        match shared.io_mode {
            IoMode::Pooled => {
                tokio::spawn(serve_socket(guard, acceptor, tcp_stream, remote_addr));
            }
            IoMode::Dedicated => spawn_dedicated(guard, acceptor, tcp_stream, remote_addr),
        }
    }
}

/// Moves the socket onto its own thread driving a current thread runtime.
fn spawn_dedicated(guard: ConnectionGuard, acceptor: Option<TlsAcceptor>, tcp_stream: TcpStream, remote_addr: SocketAddr) {
    let std_stream = match tcp_stream.into_std() {
        Ok(std_stream) => std_stream,
        Err(e) => {
            warn!(%remote_addr, cause = %e, "failed to detach connection from runtime");
            return;
        }
    };

    let spawned = std::thread::Builder::new().name(format!("mirror-conn-{remote_addr}")).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(%remote_addr, cause = %e, "failed to build connection runtime");
                return;
            }
        };

        runtime.block_on(async move {
            match TcpStream::from_std(std_stream) {
                Ok(tcp_stream) => serve_socket(guard, acceptor, tcp_stream, remote_addr).await,
                Err(e) => warn!(%remote_addr, cause = %e, "failed to attach connection to runtime"),
            }
        });
    });

    if let Err(e) = spawned {
        error!(%remote_addr, cause = %e, "failed to spawn connection thread");
    }
}

async fn serve_socket(guard: ConnectionGuard, acceptor: Option<TlsAcceptor>, tcp_stream: TcpStream, remote_addr: SocketAddr) {
    let shared = &guard.shared;
    debug!(%remote_addr, "accept connection");

    let connection = match acceptor {
        None => HttpConnection::new(tcp_stream),
        Some(acceptor) => match acceptor.accept(tcp_stream, shared.config.header_timeout).await {
            Ok(tls_stream) => HttpConnection::new(tls_stream),
            Err(e) => {
                warn!(%remote_addr, cause = %e, "tls handshake failed");
                shared.diagnostics.append(format!("{remote_addr}: tls handshake failed: {e}"));
                return;
            }
        },
    };

    let connection = connection
        .with_config(Arc::clone(&shared.config))
        .with_diagnostics(Arc::clone(&shared.diagnostics))
        .with_shutdown(shared.shutdown.clone());

    match connection.process(Arc::clone(&shared.handler)).await {
        Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
        Err(e) => info!(%remote_addr, cause = %e, "connection terminated"),
    }
}

/// Counts a connection as active until dropped.
struct ConnectionGuard {
    shared: Arc<Shared>,
}

impl ConnectionGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.active.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mirror_http::connection::HttpContext;
    use mirror_http::handler::HandlerError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn call(&self, ctx: &mut HttpContext<'_>) -> Result<(), HandlerError> {
            ctx.send_response("hello").await?;
            Ok(())
        }
    }

    async fn get(addr: SocketAddr) -> String {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn build_requires_address() {
        assert!(matches!(Server::builder().build(), Err(ServerBuildError::MissingAddress)));
    }

    #[test]
    fn build_fails_on_missing_certificate() {
        let result = Server::builder()
            .tls_address("127.0.0.1:0", PathBuf::from("/nonexistent/cert.pem"), PathBuf::from("/nonexistent/key.pem"))
            .build();
        assert!(matches!(result, Err(ServerBuildError::Tls { .. })));
    }

    #[tokio::test]
    async fn serves_and_stops() {
        let server = Server::builder().address("127.0.0.1:0").handler(Hello).build().unwrap();
        let addrs = server.start().await.unwrap();
        assert_eq!(server.local_addrs(), addrs);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));

        let response = get(addrs[0]).await;
        assert_eq!(response, "HTTP/1.1 200 OK\r\ncontent-length:5\r\nconnection:close\r\n\r\nhello");

        server.stop().await;
        assert_eq!(server.active_connections(), 0);
        assert!(TcpStream::connect(addrs[0]).await.is_err());
    }

    #[tokio::test]
    async fn default_handler_answers_503() {
        let server = Server::builder().address("127.0.0.1:0").build().unwrap();
        let addrs = server.start().await.unwrap();

        let response = get(addrs[0]).await;
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.ends_with("\r\n\r\nServer error"));

        server.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_idle_keep_alive_connection() {
        let server = Server::builder().address("127.0.0.1:0").handler(Hello).build().unwrap();
        let addrs = server.start().await.unwrap();

        let mut client = TcpStream::connect(addrs[0]).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let expected = "HTTP/1.1 200 OK\r\ncontent-length:5\r\nconnection:keep-alive\r\n\r\nhello";
        let mut response = vec![0u8; expected.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(String::from_utf8(response).unwrap(), expected);
        assert_eq!(server.active_connections(), 1);

        server.stop().await;
        assert_eq!(server.active_connections(), 0);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dedicated_io_mode() {
        let server = Server::builder().address("127.0.0.1:0").io_mode(IoMode::Dedicated).handler(Hello).build().unwrap();
        let addrs = server.start().await.unwrap();

        let response = get(addrs[0]).await;
        assert!(response.ends_with("\r\n\r\nhello"));

        server.stop().await;
        assert_eq!(server.active_connections(), 0);
    }
}
