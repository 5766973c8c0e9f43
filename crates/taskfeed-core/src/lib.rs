//! # taskfeed-core
//!
//! Foundation types shared by every taskfeed crate:
//!
//! - [`ids`]: branded ids for users, tasks and connections
//! - [`task`]: the task model, create/patch inputs and their validation
//! - [`event`]: the immutable [`DomainEvent`] emitted after each committed mutation
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod event;
pub mod ids;
pub mod logging;
pub mod task;

pub use event::{DomainEvent, EventKind};
pub use ids::{ConnectionId, TaskId, UserId};
pub use task::{NewTask, Task, TaskPatch, TaskSnapshot, ValidationError};
