//! Runtime configuration for the server and the connection registry.

use std::time::Duration;

use taskfeed_settings::{OverflowPolicy, Settings};

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
        }
    }
}

impl ServerConfig {
    /// Listener settings from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
        }
    }
}

/// Connection registry tuning.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Per-connection outbound queue bound.
    pub queue_capacity: usize,
    /// Full-queue policy.
    pub overflow: OverflowPolicy,
    /// Live connections accepted before `AtCapacity`.
    pub max_connections: usize,
    /// Interval between writer pings.
    pub heartbeat_interval: Duration,
    /// Client silence tolerated before a forced disconnect.
    pub heartbeat_timeout: Duration,
    /// Bound on the best-effort flush during teardown.
    pub drain_timeout: Duration,
    /// Echo inbound text frames back to the sender.
    pub echo_inbound: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::Disconnect,
            max_connections: 10_000,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(2),
            echo_inbound: true,
        }
    }
}

impl RegistryConfig {
    /// Registry settings from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Self {
        let fanout = &settings.fanout;
        Self {
            queue_capacity: fanout.queue_capacity,
            overflow: fanout.overflow,
            max_connections: settings.server.max_connections,
            heartbeat_interval: fanout.heartbeat_interval(),
            heartbeat_timeout: fanout.heartbeat_timeout(),
            drain_timeout: fanout.drain_timeout(),
            echo_inbound: fanout.echo_inbound,
        }
    }
}
