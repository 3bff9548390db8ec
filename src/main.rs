use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use livechat_bridge::bridge::Bridge;
use livechat_bridge::config::Config;
use livechat_bridge::gateway::{GatewayState, start_server};
use livechat_bridge::remote::http::HttpContactCenter;
use livechat_bridge::session::{FileCredentialCache, MemorySessionStore};

#[derive(Debug, Parser)]
#[command(name = "livechat-bridge", about = "Contact-center live-chat gateway")]
struct Args {
    /// Host to bind the gateway to.
    #[arg(long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Port to bind the gateway to.
    #[arg(long, env = "GATEWAY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Local .env first, then real env vars take priority inside resolve().
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livechat_bridge=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::resolve().context("failed to resolve configuration")?;
    if let Some(host) = args.host {
        config.gateway.host = host;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let api = Arc::new(HttpContactCenter::new(config.remote.clone()));
    let store = Arc::new(MemorySessionStore::new());
    let cache = Arc::new(FileCredentialCache::new(config.cache.dir.clone()));
    let state = Arc::new(GatewayState {
        bridge: Bridge::new(api, store, cache),
        config: config.gateway.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .context("invalid gateway bind address")?;
    start_server(addr, state)
        .await
        .context("failed to start gateway")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    Ok(())
}
