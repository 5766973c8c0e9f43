//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TASKFEED_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{OverflowPolicy, Settings};

/// Resolve the default settings file (`~/.taskfeed/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskfeed").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`Settings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let mut settings = merge_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TASKFEED_*` overrides read through `lookup`.
///
/// Invalid or out-of-range values are logged and ignored, leaving the
/// file/default value in place.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TASKFEED_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("TASKFEED_PORT", 1_u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("TASKFEED_MAX_CONNECTIONS", 1_usize, 1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env.string("TASKFEED_JWT_SECRET") {
        settings.auth.secret = v;
    }
    if let Some(v) = env.ranged("TASKFEED_TOKEN_TTL_SECS", 1_i64, 30 * 24 * 3600) {
        settings.auth.token_ttl_secs = v;
    }

    // ── Fan-out ─────────────────────────────────────────────────────
    if let Some(v) = env.ranged("TASKFEED_QUEUE_CAPACITY", 1_usize, 1_000_000) {
        settings.fanout.queue_capacity = v;
    }
    if let Some(v) = env.parsed("TASKFEED_OVERFLOW", OverflowPolicy::parse) {
        settings.fanout.overflow = v;
    }
    if let Some(v) = env.parsed("TASKFEED_ECHO", parse_bool) {
        settings.fanout.echo_inbound = v;
    }

    // ── Database / logging ──────────────────────────────────────────
    if let Some(v) = env.string("TASKFEED_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = env.string("TASKFEED_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and check it lies in `min..=max`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd + Copy,
    {
        self.parsed(name, |v| parse_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
