//! Per-connection state shared between the registry, the writer task and the
//! session read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use taskfeed_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::transport::CloseReason;

/// Lifecycle of a connection.
///
/// `Connecting → Live → Draining → Closed`. Only `Live` accepts enqueues, and
/// the move into `Draining` is a single compare-exchange so exactly one caller
/// owns the teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Built, writer running, not yet visible to broadcasts.
    Connecting = 0,
    /// In the registry and accepting messages.
    Live = 1,
    /// Teardown claimed; writer is flushing and closing.
    Draining = 2,
    /// Transport released.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Live,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Result of offering a message to a connection's queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    /// Queued for the writer.
    Accepted,
    /// Queue at capacity; message dropped.
    Full,
    /// Writer is gone.
    Closed,
    /// Connection is not `Live`.
    NotLive,
}

/// A subscriber connection.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    state: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    tx: mpsc::Sender<Arc<str>>,
    cancel: CancellationToken,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection in `Connecting` state.
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_reason: Mutex::new(None),
            tx,
            cancel: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
            writer: Mutex::new(None),
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Authenticated user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection accepts messages.
    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// `Connecting → Live`. Returns `false` if teardown already started.
    pub(crate) fn activate(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Live)
    }

    /// Claim teardown, recording `reason`.
    ///
    /// Succeeds for exactly one caller, from either `Connecting` or `Live`.
    pub(crate) fn begin_drain(&self, reason: CloseReason) -> bool {
        let claimed = self.transition(ConnectionState::Live, ConnectionState::Draining)
            || self.transition(ConnectionState::Connecting, ConnectionState::Draining);
        if claimed {
            *self.close_reason.lock() = Some(reason);
        }
        claimed
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reason recorded by the caller that claimed teardown.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Offer a message without waiting.
    pub fn enqueue(&self, message: Arc<str>) -> Enqueue {
        if !self.is_live() {
            return Enqueue::NotLive;
        }
        self.push(message)
    }

    /// Queue a message regardless of state. Used for the greeting, which must
    /// precede anything a broadcast can enqueue.
    pub(crate) fn push(&self, message: Arc<str>) -> Enqueue {
        match self.tx.try_send(message) {
            Ok(()) => Enqueue::Accepted,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Full
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Writer cancellation. Also fires the session read loop.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Record inbound activity (pong, text, ping).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub(crate) fn set_writer(&self, handle: JoinHandle<()>) {
        *self.writer.lock() = Some(handle);
    }

    pub(crate) fn take_writer(&self) -> Option<JoinHandle<()>> {
        self.writer.lock().take()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
