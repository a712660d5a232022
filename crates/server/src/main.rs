//! A demo server: a text page at `/`, the diagnostics dump at `/diagnostics` and a
//! WebSocket echo at `/ws`.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use http::StatusCode;
use mirror_http::connection::HttpContext;
use mirror_http::diagnostics::DiagnosticsLog;
use mirror_http::handler::{Handler, HandlerError};
use mirror_http::protocol::HttpError;
use mirror_http::websocket::MessageType;
use mirror_server::{ListenerConfig, Server, ServerConfig};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Parser, Debug)]
#[command(name = "mirror-server", about = "Serves HTTP and WebSocket requests", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional plaintext listener address
    #[arg(short, long)]
    address: Option<String>,
}

#[derive(Debug)]
struct DemoHandler {
    diagnostics: Arc<DiagnosticsLog>,
}

#[async_trait]
impl Handler for DemoHandler {
    async fn call(&self, ctx: &mut HttpContext<'_>) -> Result<(), HandlerError> {
        let path = ctx.request().path().to_string();
        match path.as_str() {
            "/" => ctx.send_response("mirror server is running\n").await?,
            "/diagnostics" => {
                ctx.response_mut().set_content_type("text/plain; charset=utf-8")?;
                ctx.send_response(self.diagnostics.dump()).await?;
            }
            "/ws" => echo(ctx).await?,
            _ => ctx.send_status(StatusCode::NOT_FOUND, format!("{path} not found")).await?,
        }
        Ok(())
    }
}

async fn echo(ctx: &mut HttpContext<'_>) -> Result<(), HttpError> {
    let mut ws = ctx.accept_websocket(None).await?;
    let mut message = Vec::new();
    loop {
        message.clear();
        let result = ws.receive_message(&mut message).await?;
        if result.message_type == MessageType::Close {
            return Ok(());
        }
        ws.send(&message, result.message_type, true).await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = cli.address {
        config.listeners.push(ListenerConfig::plain(address));
    }
    if config.listeners.is_empty() {
        config.listeners.push(ListenerConfig::plain(DEFAULT_ADDRESS));
    }

    let diagnostics = Arc::new(DiagnosticsLog::with_capacity(config.diagnostics_capacity));
    let server = Server::builder()
        .diagnostics(Arc::clone(&diagnostics))
        .config(&config)
        .handler(DemoHandler { diagnostics })
        .build()?;

    let addrs = server.start().await?;
    info!(?addrs, "server started, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, stopping");
    server.stop().await;
    Ok(())
}
