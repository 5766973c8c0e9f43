//! # taskfeed-store
//!
//! Durable task storage with explicit transactions.
//!
//! - [`TaskStore`] / [`TaskTransaction`]: the contracts the mutation service
//!   is written against
//! - [`SqliteTaskStore`]: `rusqlite` implementation over an `r2d2` pool
//! - [`migrations`]: embedded, versioned schema migrations

#![deny(unsafe_code)]

pub mod errors;
pub mod migrations;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use pool::{ConnectionConfig, ConnectionPool};
pub use sqlite::SqliteTaskStore;
pub use store::{TaskStore, TaskTransaction};
