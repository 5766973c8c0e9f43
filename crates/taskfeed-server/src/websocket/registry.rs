//! Connection registry: the set of live subscribers and event fan-out.
//!
//! The registry owns every [`Connection`]. Broadcast is synchronous: it
//! serializes an event once and offers it to each live connection's bounded
//! queue without waiting, so one slow client cannot hold up the others or the
//! mutation that produced the event. Each connection's writer task does the
//! actual I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use taskfeed_auth::{AuthError, TokenValidator};
use taskfeed_core::{ConnectionId, DomainEvent, UserId};
use taskfeed_settings::OverflowPolicy;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{Connection, Enqueue};
use super::transport::{CloseReason, Transport};
use super::writer::{CLOSE_GRACE, ConnectionWriter, WriterTiming};
use crate::config::RegistryConfig;
use crate::metrics::{
    BROADCAST_EVENTS_TOTAL, WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Why a subscribe was refused.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Credential failed validation.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    /// `max_connections` live connections already exist.
    #[error("connection limit reached ({limit})")]
    AtCapacity {
        /// Configured limit.
        limit: usize,
    },
    /// Shutdown has begun.
    #[error("registry is shutting down")]
    ShuttingDown,
    /// The transport failed before the connection went live.
    #[error("connection closed during subscribe")]
    Disconnected,
}

/// Owns all live subscriber connections.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    validator: Arc<dyn TokenValidator>,
    config: RegistryConfig,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(validator: Arc<dyn TokenValidator>, config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            validator,
            config,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Authenticate `credential` and register `transport` as a live
    /// subscriber.
    ///
    /// On any refusal the transport is closed with the matching reason and
    /// nothing is added. On success the first frame the client receives is
    /// the `connection_established` greeting.
    pub async fn subscribe(
        self: &Arc<Self>,
        mut transport: Box<dyn Transport>,
        credential: &str,
    ) -> Result<ConnectionId, RegistryError> {
        if self.is_closed() {
            transport.close(CloseReason::Shutdown).await;
            return Err(RegistryError::ShuttingDown);
        }

        let claim = match self.validator.validate(credential) {
            Ok(claim) => claim,
            Err(e) => {
                debug!(code = e.code(), "subscribe rejected");
                transport.close(CloseReason::Unauthenticated).await;
                return Err(e.into());
            }
        };

        if self.connection_count() >= self.config.max_connections {
            transport.close(CloseReason::AtCapacity).await;
            return Err(RegistryError::AtCapacity {
                limit: self.config.max_connections,
            });
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let conn = Arc::new(Connection::new(id, claim.user_id, tx));

        let writer = ConnectionWriter::new(Arc::clone(&conn), rx, self.writer_timing());
        let registry = Arc::clone(self);
        let faulted = Arc::clone(&conn);
        conn.set_writer(tokio::spawn(writer.run(transport, move |id, reason| {
            // Not yet inserted: claim teardown on the connection itself.
            if registry.detach(id, reason).is_none() && faulted.begin_drain(reason) {
                faulted.cancel();
            }
        })));

        if let Err(e) = self.insert(&conn) {
            if conn.begin_drain(rejection_reason(&e)) {
                conn.cancel();
            }
            self.await_writer(&conn).await;
            return Err(e);
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %id, user_id = %conn.user_id(), "client subscribed");
        Ok(id)
    }

    /// Make a built connection visible to broadcasts.
    fn insert(&self, conn: &Arc<Connection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.write();
        if self.is_closed() {
            return Err(RegistryError::ShuttingDown);
        }
        if conns.len() >= self.config.max_connections {
            return Err(RegistryError::AtCapacity {
                limit: self.config.max_connections,
            });
        }
        if !conn.activate() {
            return Err(RegistryError::Disconnected);
        }
        // Queued under the write lock so no broadcast can get ahead of it.
        let _ = conn.push(greeting(conn.id(), conn.user_id()));
        let _ = conns.insert(conn.id(), Arc::clone(conn));
        Ok(())
    }

    /// Remove a connection and wait for its writer to flush and close.
    ///
    /// Unknown or already-departing ids are a no-op.
    pub async fn unsubscribe(&self, id: ConnectionId) {
        self.unsubscribe_with(id, CloseReason::Normal).await;
    }

    /// [`unsubscribe`](Self::unsubscribe) with an explicit close reason.
    pub async fn unsubscribe_with(&self, id: ConnectionId, reason: CloseReason) {
        let Some(conn) = self.detach(id, reason) else {
            debug!(conn_id = %id, "unsubscribe of unknown connection");
            return;
        };
        self.await_writer(&conn).await;
    }

    /// Claim teardown of `id`, remove it and cancel its writer. Never waits.
    ///
    /// Returns the connection if this call won the claim.
    pub(crate) fn detach(&self, id: ConnectionId, reason: CloseReason) -> Option<Arc<Connection>> {
        let conn = self.connections.read().get(&id).cloned()?;
        if !conn.begin_drain(reason) {
            return None;
        }
        let _ = self.connections.write().remove(&id);
        conn.cancel();

        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            conn_id = %id,
            user_id = %conn.user_id(),
            %reason,
            dropped = conn.drop_count(),
            age_secs = conn.age().as_secs(),
            "connection detached"
        );
        Some(conn)
    }

    async fn await_writer(&self, conn: &Connection) {
        join_writer(conn, self.writer_bound()).await;
    }

    /// Join a detached connection's writer without holding up the caller.
    fn reap(&self, conn: Arc<Connection>) {
        let bound = self.writer_bound();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let _ = rt.spawn(async move { join_writer(&conn, bound).await });
            }
            Err(_) => {
                if let Some(handle) = conn.take_writer() {
                    handle.abort();
                }
            }
        }
    }

    /// Longest a cancelled writer may take: the flush plus the close frame.
    fn writer_bound(&self) -> Duration {
        self.config.drain_timeout + CLOSE_GRACE * 2
    }

    /// Offer `event` to every live connection. Never waits.
    ///
    /// Returns the number of connections the event was queued for. A full
    /// queue drops the event for that connection only; under
    /// [`OverflowPolicy::Disconnect`] the connection is then detached.
    pub fn broadcast(&self, event: &DomainEvent) -> usize {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(event = %event.kind(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut overflowed = Vec::new();
        let mut gone = Vec::new();
        {
            let conns = self.connections.read();
            for conn in conns.values() {
                match conn.enqueue(Arc::clone(&payload)) {
                    Enqueue::Accepted => delivered += 1,
                    Enqueue::Full => {
                        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                        warn!(
                            conn_id = %conn.id(),
                            event = %event.kind(),
                            task_id = %event.task_id(),
                            dropped = conn.drop_count(),
                            "queue full, event dropped"
                        );
                        if self.config.overflow == OverflowPolicy::Disconnect {
                            overflowed.push(conn.id());
                        }
                    }
                    Enqueue::Closed => gone.push(conn.id()),
                    Enqueue::NotLive => {}
                }
            }
        }

        let departed = overflowed
            .into_iter()
            .map(|id| (id, CloseReason::Overflow))
            .chain(gone.into_iter().map(|id| (id, CloseReason::WriteError)));
        for (id, reason) in departed {
            if let Some(conn) = self.detach(id, reason) {
                self.reap(conn);
            }
        }

        counter!(BROADCAST_EVENTS_TOTAL, "event" => event.kind().as_str()).increment(1);
        debug!(
            event = %event.kind(),
            task_id = %event.task_id(),
            recipients = delivered,
            "broadcast event"
        );
        delivered
    }

    /// Queue `message` for one connection. Unknown ids and full queues are
    /// logged and swallowed; returns whether the message was queued.
    pub fn send_direct(&self, id: ConnectionId, message: impl Into<Arc<str>>) -> bool {
        let Some(conn) = self.connection(id) else {
            debug!(conn_id = %id, "send to unknown connection");
            return false;
        };
        match conn.enqueue(message.into()) {
            Enqueue::Accepted => true,
            Enqueue::Full => {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %id, "queue full, direct message dropped");
                false
            }
            Enqueue::Closed | Enqueue::NotLive => {
                debug!(conn_id = %id, "send to departing connection");
                false
            }
        }
    }

    /// Refuse new subscribers and unsubscribe everyone.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("registry already closed");
        }
        let ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        let count = ids.len();
        let _ = futures::future::join_all(
            ids.into_iter()
                .map(|id| self.unsubscribe_with(id, CloseReason::Shutdown)),
        )
        .await;
        info!(closed = count, "registry shut down");
    }

    /// Whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Look up a live connection.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    fn writer_timing(&self) -> WriterTiming {
        WriterTiming {
            heartbeat_interval: self.config.heartbeat_interval,
            heartbeat_timeout: self.config.heartbeat_timeout,
            drain_timeout: self.config.drain_timeout,
        }
    }
}

async fn join_writer(conn: &Connection, bound: Duration) {
    let Some(mut handle) = conn.take_writer() else {
        return;
    };
    match tokio::time::timeout(bound, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(conn_id = %conn.id(), error = %e, "writer task failed"),
        Err(_) => {
            warn!(conn_id = %conn.id(), "writer did not finish in time, aborting");
            handle.abort();
        }
    }
}

fn rejection_reason(err: &RegistryError) -> CloseReason {
    match err {
        RegistryError::Unauthenticated(_) => CloseReason::Unauthenticated,
        RegistryError::AtCapacity { .. } => CloseReason::AtCapacity,
        RegistryError::ShuttingDown => CloseReason::Shutdown,
        RegistryError::Disconnected => CloseReason::WriteError,
    }
}

/// First frame sent on every accepted connection.
fn greeting(id: ConnectionId, user_id: &UserId) -> Arc<str> {
    serde_json::json!({
        "event": "connection_established",
        "connection_id": id,
        "user_id": user_id,
    })
    .to_string()
    .into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
