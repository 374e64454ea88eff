//! HTTP server wiring: shared state, middleware stack and lifecycle.

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ApiConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::gateway::PushGateway;
use crate::logging::LoggingConfig;
use crate::orchestrator::NotificationOrchestrator;

/// Health probes are polled constantly and stay out of the request log.
fn is_probe(path: &str) -> bool {
    path.starts_with("/api/health")
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12580,
            enable_cors: true,
        }
    }
}

impl From<&ApiConfig> for ApiServerConfig {
    fn from(api: &ApiConfig) -> Self {
        Self {
            bind_address: api.bind_address.clone(),
            port: api.port,
            ..Default::default()
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Arc<PushGateway>,
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<PushGateway>,
        orchestrator: Arc<NotificationOrchestrator>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            dispatcher,
            gateway,
            orchestrator,
            logging_config: None,
        }
    }

    /// Expose runtime log filter control on `/api/logging`.
    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Routes plus CORS and request tracing.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if is_probe(req.uri().path()) {
                        Span::none()
                    } else {
                        tracing::info_span!(
                            "request",
                            method = %req.method(),
                            path = %req.uri().path(),
                        )
                    }
                })
                .on_request(())
                .on_response(|res: &Response, latency: Duration, span: &Span| {
                    if !span.is_disabled() {
                        tracing::info!(
                            parent: span,
                            status = res.status().as_u16(),
                            latency_ms = latency.as_millis() as u64,
                            "Request finished"
                        );
                    }
                })
                .on_failure(
                    |class: ServerErrorsFailureClass, latency: Duration, span: &Span| {
                        if !span.is_disabled() {
                            tracing::error!(
                                parent: span,
                                latency_ms = latency.as_millis() as u64,
                                "Request failed: {}",
                                class
                            );
                        }
                    },
                ),
        )
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Accepting HTTP and WebSocket connections");
        }

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("HTTP server stopped accepting connections");
            })
            .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
