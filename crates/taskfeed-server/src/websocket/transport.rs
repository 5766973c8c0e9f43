//! The outbound half of a subscriber connection.
//!
//! The registry never touches sockets directly: each connection's writer task
//! owns a boxed [`Transport`] and is the only code that writes to it.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use thiserror::Error;

/// Why a connection was closed. Recorded by whoever claims the teardown and
/// sent to the client in the close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Client left or server unsubscribed it.
    Normal,
    /// Credential failed validation.
    Unauthenticated,
    /// Registry already holds `max_connections`.
    AtCapacity,
    /// Outbound queue was full when an event arrived.
    Overflow,
    /// Server is shutting down.
    Shutdown,
    /// No pong or other traffic within the heartbeat timeout.
    Timeout,
    /// A write to the transport failed or the writer panicked.
    WriteError,
}

impl CloseReason {
    /// WebSocket close code.
    pub const fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Shutdown | Self::Timeout => 1001,
            Self::Unauthenticated => 1008,
            Self::WriteError => 1011,
            Self::AtCapacity | Self::Overflow => 1013,
        }
    }

    /// Close frame reason text and metrics label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Unauthenticated => "unauthenticated",
            Self::AtCapacity => "at_capacity",
            Self::Overflow => "overflow",
            Self::Shutdown => "shutdown",
            Self::Timeout => "timeout",
            Self::WriteError => "write_error",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write to the client failed; the connection is unusable.
#[derive(Debug, Error)]
#[error("transport write failed: {0}")]
pub struct TransportError(pub String);

/// Outbound message sink for one client.
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Write a ping frame.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and release the underlying socket. Best effort;
    /// called exactly once per transport.
    async fn close(&mut self, reason: CloseReason);
}

/// [`Transport`] over the send half of an axum WebSocket.
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsTransport {
    /// Wrap the send half of a split socket.
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.as_str().into(),
        };
        let _ = self.sink.send(Message::Close(Some(frame))).await;
        let _ = self.sink.close().await;
    }
}
