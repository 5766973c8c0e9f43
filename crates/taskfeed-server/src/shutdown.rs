//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Default bound on the whole graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the listener and every subscriber connection.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop accepting work and tear everything down.
    ///
    /// 1. Cancel the token (the listener stops accepting)
    /// 2. Close the registry and unsubscribe every connection
    /// 3. Wait up to `timeout` for the tracked tasks
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            connections = registry.connection_count(),
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "shutting down"
        );

        let drain = async {
            registry.shutdown().await;
            let _ = futures::future::join_all(handles).await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
