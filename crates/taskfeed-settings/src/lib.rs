//! # taskfeed-settings
//!
//! Server configuration with layered sources.
//!
//! Settings are resolved in order: compiled defaults, then
//! `~/.taskfeed/settings.json` deep-merged on top, then `TASKFEED_*`
//! environment variables. The binary applies its CLI flags last.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    AuthSettings, DatabaseSettings, FanoutSettings, LoggingSettings, OverflowPolicy,
    ServerSettings, Settings,
};
