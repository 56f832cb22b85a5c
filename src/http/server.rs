//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, body limit)
//! - Mount the admin API when enabled
//! - Start the rate limiter sweeper alongside the server
//! - Serve until the shutdown signal fires

use axum::{
    body::Body,
    http::Request,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::http::handlers::{
    chat_generate, chat_generate_stream, chat_query, delete_document, get_config, get_operation,
    health, list_documents,
};
use crate::http::request::{propagate_request_id, set_request_id, X_REQUEST_ID};
use crate::upstream::{Gateway, GeminiClient, Upstream};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Arc<GatewayConfig>,
}

/// HTTP front of the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Build a server talking to the configured remote service.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let client = GeminiClient::new(&config.upstream, &config.generation)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Build a server around any upstream implementation.
    pub fn new(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Self {
        let state = AppState {
            gateway: Gateway::new(&config, upstream),
            config: Arc::new(config),
        };
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();

        let mut router = Router::new()
            .route("/api/config", get(get_config))
            .route("/api/chat/query", post(chat_query))
            .route("/api/chat/generate", post(chat_generate))
            .route("/api/chat/generate-stream", post(chat_generate_stream))
            .route("/api/documents", get(list_documents))
            .route("/api/documents/{*name}", delete(delete_document))
            .route("/api/operations/{*name}", get(get_operation))
            .route("/health", get(health));

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(propagate_request_id())
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size)),
        )
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn gateway(&self) -> &Gateway {
        &self.state.gateway
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(limiter) = self.state.gateway.limiter().cloned() {
            let interval = Duration::from_secs(self.state.config.rate_limit.eviction_interval_secs);
            let sweeper_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                limiter.run_eviction(interval, sweeper_shutdown).await;
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
