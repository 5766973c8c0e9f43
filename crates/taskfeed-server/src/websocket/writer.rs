//! Per-connection writer task.
//!
//! The writer is the only code that touches a connection's transport. It
//! drains the queue in FIFO order, pings on an interval, and on the way out
//! flushes what is left (bounded), sends the close frame and marks the
//! connection closed. The transport is closed exactly once on every path.
//!
//! A single write never outlives cancellation or the heartbeat timeout, so a
//! client that stops reading cannot pin its writer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use taskfeed_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::connection::Connection;
use super::transport::{CloseReason, Transport, TransportError};

/// Bound on sending the close frame.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Heartbeat and flush timing for one writer.
#[derive(Clone, Copy, Debug)]
pub struct WriterTiming {
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// Inbound silence tolerated before disconnect. Also bounds a single
    /// write or ping.
    pub heartbeat_timeout: Duration,
    /// Bound on the final flush.
    pub drain_timeout: Duration,
}

enum LoopExit {
    Cancelled,
    Fault(CloseReason),
}

/// Drives one connection's transport until teardown.
pub struct ConnectionWriter {
    conn: Arc<Connection>,
    rx: mpsc::Receiver<Arc<str>>,
    timing: WriterTiming,
}

impl ConnectionWriter {
    /// Create a writer for `conn` reading from `rx`.
    pub fn new(conn: Arc<Connection>, rx: mpsc::Receiver<Arc<str>>, timing: WriterTiming) -> Self {
        Self { conn, rx, timing }
    }

    /// Run until cancelled or faulted.
    ///
    /// On a fault (write error, heartbeat timeout, panic in the drain loop)
    /// `on_fault` is called before the close so the registry can detach the
    /// connection and record the reason.
    pub async fn run(
        mut self,
        mut transport: Box<dyn Transport>,
        on_fault: impl FnOnce(ConnectionId, CloseReason) + Send,
    ) {
        let id = self.conn.id();
        let exit = AssertUnwindSafe(self.drain_loop(transport.as_mut()))
            .catch_unwind()
            .await;

        match exit {
            Ok(LoopExit::Cancelled) => self.flush(transport.as_mut()).await,
            Ok(LoopExit::Fault(reason)) => on_fault(id, reason),
            Err(_) => {
                error!(conn_id = %id, "writer panicked, detaching connection");
                on_fault(id, CloseReason::WriteError);
            }
        }

        self.rx.close();
        let reason = self.conn.close_reason().unwrap_or(CloseReason::Normal);
        if tokio::time::timeout(CLOSE_GRACE, transport.close(reason))
            .await
            .is_err()
        {
            debug!(conn_id = %id, "close frame timed out");
        }
        drop(transport);
        self.conn.mark_closed();
        debug!(conn_id = %id, %reason, "writer finished");
    }

    async fn drain_loop(&mut self, transport: &mut dyn Transport) -> LoopExit {
        let cancel = self.conn.cancellation();
        let mut ticker = tokio::time::interval(self.timing.heartbeat_interval);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return LoopExit::Cancelled,
                msg = self.rx.recv() => {
                    let Some(text) = msg else { return LoopExit::Cancelled };
                    if let Some(exit) = self.guarded(&cancel, transport.send_text(&text)).await {
                        return exit;
                    }
                }
                _ = ticker.tick() => {
                    if self.conn.idle_for() > self.timing.heartbeat_timeout {
                        warn!(
                            conn_id = %self.conn.id(),
                            timeout = ?self.timing.heartbeat_timeout,
                            "client unresponsive, disconnecting"
                        );
                        return LoopExit::Fault(CloseReason::Timeout);
                    }
                    if let Some(exit) = self.guarded(&cancel, transport.ping()).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Run one transport write, giving up on cancellation or when it stalls
    /// past the heartbeat timeout. `None` means the write went through.
    async fn guarded<F>(&self, cancel: &CancellationToken, op: F) -> Option<LoopExit>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        tokio::select! {
            biased;
            sent = tokio::time::timeout(self.timing.heartbeat_timeout, op) => match sent {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(self.write_failed(&e)),
                Err(_) => {
                    warn!(
                        conn_id = %self.conn.id(),
                        timeout = ?self.timing.heartbeat_timeout,
                        "write stalled, disconnecting"
                    );
                    Some(LoopExit::Fault(CloseReason::Timeout))
                }
            },
            () = cancel.cancelled() => Some(LoopExit::Cancelled),
        }
    }

    fn write_failed(&self, e: &TransportError) -> LoopExit {
        debug!(conn_id = %self.conn.id(), error = %e, "write failed");
        LoopExit::Fault(CloseReason::WriteError)
    }

    /// Best-effort delivery of what was queued before cancellation.
    async fn flush(&mut self, transport: &mut dyn Transport) {
        let rx = &mut self.rx;
        let pending = async {
            let mut sent = 0_usize;
            while let Ok(text) = rx.try_recv() {
                if transport.send_text(&text).await.is_err() {
                    break;
                }
                sent += 1;
            }
            sent
        };
        match tokio::time::timeout(self.timing.drain_timeout, pending).await {
            Ok(0) => {}
            Ok(sent) => debug!(conn_id = %self.conn.id(), sent, "flushed queue"),
            Err(_) => warn!(conn_id = %self.conn.id(), "flush timed out"),
        }
    }
}
