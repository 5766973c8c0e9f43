//! `TaskfeedServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use taskfeed_auth::TokenValidator;
use taskfeed_store::TaskStore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::{RegistryConfig, ServerConfig};
use crate::health::{self, HealthResponse};
use crate::http;
use crate::mutation::MutationService;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::event_router::EventRouter;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live subscriber connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Task mutations and reads.
    pub mutations: Arc<MutationService>,
    /// Bearer credential validation.
    pub validator: Arc<dyn TokenValidator>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The taskfeed server.
pub struct TaskfeedServer {
    config: ServerConfig,
    state: AppState,
}

impl TaskfeedServer {
    /// Wire the registry, event router and mutation service around `store`.
    pub fn new(
        config: ServerConfig,
        registry_config: RegistryConfig,
        validator: Arc<dyn TokenValidator>,
        store: Arc<dyn TaskStore>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&validator), registry_config));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry)));
        let mutations = Arc::new(MutationService::new(store, router));
        let state = AppState {
            registry,
            mutations,
            validator,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        };
        Self { config, state }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/tasks", get(ws_handler))
            .merge(http::routes())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the listener and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.state.shutdown.token();
        info!(%addr, "listening");

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Get the mutation service.
    pub fn mutations(&self) -> &Arc<MutationService> {
        &self.state.mutations
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
