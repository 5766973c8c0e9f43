//! Routes committed domain events to the connection registry.

use std::sync::Arc;

use taskfeed_core::DomainEvent;
use tracing::trace;

use super::registry::ConnectionRegistry;

/// Receiver of committed mutations.
///
/// Called exactly once per successful commit, after the commit returns, and
/// never for a failed one.
pub trait EventSink: Send + Sync {
    /// Handle one committed event.
    fn on_commit(&self, event: &DomainEvent);
}

/// Forwards every committed event to [`ConnectionRegistry::broadcast`].
///
/// Broadcast is unscoped: every subscriber sees every mutation regardless of
/// which user owns the task.
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
}

impl EventRouter {
    /// Create a router feeding `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl EventSink for EventRouter {
    fn on_commit(&self, event: &DomainEvent) {
        let recipients = self.registry.broadcast(event);
        trace!(event = %event.kind(), task_id = %event.task_id(), recipients, "routed");
    }
}
