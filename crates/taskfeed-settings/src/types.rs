//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.
//!
//! ```json
//! {
//!   "server": { "port": 9000 },
//!   "fanout": { "queueCapacity": 64, "overflow": "skip" }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskfeed_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Network listener.
    pub server: ServerSettings,
    /// Bearer token signing and lifetime.
    pub auth: AuthSettings,
    /// Per-connection queueing, heartbeat and teardown.
    pub fanout: FanoutSettings,
    /// Task database.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));
        if self.fanout.queue_capacity == 0 {
            return invalid("fanout.queueCapacity must be greater than 0");
        }
        if self.server.max_connections == 0 {
            return invalid("server.maxConnections must be greater than 0");
        }
        if self.fanout.heartbeat_timeout_secs < self.fanout.heartbeat_interval_secs {
            return invalid("fanout.heartbeatTimeoutSecs must be >= heartbeatIntervalSecs");
        }
        if self.auth.secret.is_empty() {
            return invalid("auth.secret must not be empty");
        }
        if self.auth.token_ttl_secs <= 0 {
            return invalid("auth.tokenTtlSecs must be positive");
        }
        if self.database.pool_size == 0 {
            return invalid("database.poolSize must be greater than 0");
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Live WebSocket connections accepted before refusing new ones.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 10_000,
        }
    }
}

/// Development signing secret. Anything reachable from outside should set
/// `auth.secret` or `TASKFEED_JWT_SECRET`.
pub const DEV_SECRET: &str = "taskfeed-dev-secret";

/// Token settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 shared secret.
    pub secret: String,
    /// Required `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Lifetime of issued tokens in seconds.
    pub token_ttl_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: DEV_SECRET.to_string(),
            issuer: None,
            token_ttl_secs: 60 * 60,
        }
    }
}

impl AuthSettings {
    /// Whether the secret is still the compiled-in development value.
    pub fn uses_dev_secret(&self) -> bool {
        self.secret == DEV_SECRET
    }
}

/// What happens to a connection whose queue is full when an event arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the event and disconnect the slow client.
    #[default]
    Disconnect,
    /// Drop the event; the client stays connected and sees a gap.
    Skip,
}

impl OverflowPolicy {
    /// Parse `disconnect` / `skip` (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_ascii_lowercase().as_str() {
            "disconnect" => Some(Self::Disconnect),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Fan-out settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Per-connection outbound queue bound.
    pub queue_capacity: usize,
    /// Full-queue policy.
    pub overflow: OverflowPolicy,
    /// Echo inbound text frames back to the sender.
    pub echo_inbound: bool,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds of client silence before a forced disconnect.
    pub heartbeat_timeout_secs: u64,
    /// Upper bound on waiting for a writer to flush during unsubscribe.
    pub drain_timeout_ms: u64,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::Disconnect,
            echo_inbound: true,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            drain_timeout_ms: 2_000,
        }
    }
}

impl FanoutSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Silence allowed before disconnect.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Drain bound.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` file path, or `:memory:`.
    pub path: String,
    /// Pooled connections.
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "taskfeed.db".to_string(),
            pool_size: 8,
        }
    }
}

impl DatabaseSettings {
    /// Whether `path` names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["fanout"]["queueCapacity"], 256);
        assert_eq!(json["fanout"]["overflow"], "disconnect");
        assert_eq!(json["server"]["maxConnections"], 10_000);
        assert!(json["auth"].get("issuer").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"fanout": {"overflow": "skip"}}"#).unwrap();
        assert_eq!(s.fanout.overflow, OverflowPolicy::Skip);
        assert_eq!(s.fanout.queue_capacity, 256);
        assert_eq!(s.server.port, 8000);
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut s = Settings::default();
        s.fanout.queue_capacity = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("queueCapacity"));
    }

    #[test]
    fn heartbeat_timeout_below_interval_rejected() {
        let mut s = Settings::default();
        s.fanout.heartbeat_timeout_secs = 5;
        s.fanout.heartbeat_interval_secs = 10;
        assert!(s.validate().is_err());
    }

    #[test]
    fn overflow_parse() {
        assert_eq!(OverflowPolicy::parse("SKIP"), Some(OverflowPolicy::Skip));
        assert_eq!(OverflowPolicy::parse("disconnect"), Some(OverflowPolicy::Disconnect));
        assert_eq!(OverflowPolicy::parse("block"), None);
    }

    #[test]
    fn memory_database_detected() {
        let db = DatabaseSettings {
            path: ":memory:".into(),
            ..DatabaseSettings::default()
        };
        assert!(db.is_in_memory());
        assert!(!DatabaseSettings::default().is_in_memory());
    }
}
