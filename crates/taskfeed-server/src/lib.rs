//! # taskfeed-server
//!
//! Axum HTTP + `WebSocket` server for the task feed.
//!
//! - HTTP endpoints: task CRUD under `/tasks`, `/health`, `/metrics`
//! - `WebSocket` gateway at `/ws/tasks`: authenticated subscribers, per-connection
//!   bounded queues and writer tasks, heartbeat
//! - Committed task mutations are broadcast to every live subscriber via the
//!   [`websocket::event_router::EventRouter`]
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod mutation;
pub mod server;
pub mod shutdown;
pub mod websocket;
