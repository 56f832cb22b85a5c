//! Retrieval gateway server.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                 RETRIEVAL GATEWAY                │
//!                       │                                                  │
//!   Client Request      │  ┌────────┐   ┌──────────────┐   ┌───────────┐   │
//!   ────────────────────┼─▶│  http  │──▶│ rate limiter │──▶│   cache   │   │
//!                       │  │handlers│   └──────────────┘   └─────┬─────┘   │
//!                       │  └────────┘                            │ miss    │
//!                       │       ▲                                ▼         │
//!                       │       │        ┌──────────────┐   ┌───────────┐  │
//!                       │       │        │   circuit    │◀──│   retry   │  │
//!                       │       │        │   breaker    │   │controller │  │
//!                       │       │        └──────────────┘   └─────┬─────┘  │
//!                       │  ┌────┴─────┐                           │        │     Remote
//!   JSON / SSE events   │  │  stream  │◀──────────────────────────┴────────┼───▶ generative
//!   ◀───────────────────┼──│  relay   │         upstream client            │     API
//!                       │  └──────────┘                                    │
//!                       └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use retrieval_gateway::config::{load_config, loader::finalize, GatewayConfig};
use retrieval_gateway::lifecycle::signals::shutdown_on_ctrl_c;
use retrieval_gateway::observability::{logging, metrics};
use retrieval_gateway::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "retrieval-gateway")]
#[command(about = "Resilient gateway for a generative document-retrieval API", long_about = None)]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => finalize(GatewayConfig::default())?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "retrieval-gateway starting");

    if config.upstream.api_key.is_empty() {
        tracing::warn!("No upstream API key configured; upstream calls will fail");
    }
    if config.upstream.file_search_store.is_empty() {
        tracing::warn!("No file search store configured; queries must name a document");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        failure_threshold = config.circuit_breaker.failure_threshold,
        rate_limit = config.rate_limit.max_requests,
        cache_ttl_secs = config.cache.ttl_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let server = HttpServer::from_config(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
