//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared state (fetcher, rewriter, cache, static shell)
//! - Create the Axum router and wire up middleware (request ID, tracing,
//!   timeout, concurrency limit)
//! - Run the disk sweeper next to the server
//! - Drain in-flight requests on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, routing::get, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{CacheError, CacheService, DiskSweeper};
use crate::config::ProxyConfig;
use crate::http::handler::proxy_handler;
use crate::http::request::{self, UuidRequestId};
use crate::http::shell::StaticShell;
use crate::lifecycle::Shutdown;
use crate::rewrite::Rewriter;
use crate::upstream::{Fetcher, HttpFetcher};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<dyn Fetcher>,
    pub rewriter: Arc<Rewriter>,
    pub cache: Arc<CacheService>,
    pub shell: Arc<StaticShell>,
    pub respect_no_store: bool,
}

/// Errors raised while assembling the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to open response cache: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP server for the unblocking proxy.
pub struct HttpServer {
    config: ProxyConfig,
    state: AppState,
}

impl HttpServer {
    /// Build the server and its subsystems from a validated configuration.
    pub async fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let fetcher = Arc::new(HttpFetcher::new(&config.upstream, &config.retries)?);
        let cache = Arc::new(CacheService::open(&config.cache).await?);
        Ok(Self::from_parts(config, fetcher, cache))
    }

    /// Assemble a server around an existing fetcher and cache.
    pub fn from_parts(config: ProxyConfig, fetcher: Arc<dyn Fetcher>, cache: Arc<CacheService>) -> Self {
        let state = AppState {
            fetcher,
            rewriter: Arc::new(Rewriter::new(config.rewrite.clone())),
            cache,
            shell: Arc::new(StaticShell::new(&config.shell)),
            respect_no_store: config.cache.respect_no_store,
        };
        Self { config, state }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost first: concurrency limit, request id, trace, timeout.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(proxy_handler))
            .route("/{*path}", get(proxy_handler))
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request::request_id(req.headers()),
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(GlobalConcurrencyLimitLayer::new(
                self.config.listener.max_concurrent_requests,
            ))
    }

    /// Run the server on `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = self.state.cache.disk().is_some().then(|| {
            let sweeper = DiskSweeper::new(
                self.state.cache.clone(),
                self.config.cache.disk.sweep_interval(),
            );
            tokio::spawn(sweeper.run(shutdown.subscribe()))
        });

        let mut rx = shutdown.subscribe();
        let already_triggered = shutdown.is_triggered();
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if !already_triggered {
                    let _ = rx.recv().await;
                }
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
