//! Storage contracts consumed by the mutation service.

use taskfeed_core::{NewTask, Task, TaskId, TaskPatch, UserId};

use crate::errors::Result;

/// Durable task storage scoped by owner.
///
/// Reads run outside any transaction. Writes go through [`TaskStore::begin`].
pub trait TaskStore: Send + Sync {
    /// Fetch one task. `None` when absent or owned by someone else.
    fn get(&self, owner: &UserId, id: TaskId) -> Result<Option<Task>>;

    /// List the owner's tasks in id order.
    fn list(&self, owner: &UserId, skip: u32, limit: u32) -> Result<Vec<Task>>;

    /// Open a write transaction.
    fn begin(&self) -> Result<Box<dyn TaskTransaction>>;
}

/// An open write transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back.
pub trait TaskTransaction: Send {
    /// Insert a task owned by `owner` and return it with its assigned id.
    fn insert(&mut self, owner: &UserId, task: &NewTask) -> Result<Task>;

    /// Apply `patch` and refresh `updated_at`. `None` when the row is absent
    /// or not owned by `owner`.
    fn update(&mut self, owner: &UserId, id: TaskId, patch: &TaskPatch) -> Result<Option<Task>>;

    /// Delete a task. Returns whether a row was removed.
    fn delete(&mut self, owner: &UserId, id: TaskId) -> Result<bool>;

    /// Make the transaction's writes durable.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the transaction's writes.
    fn rollback(self: Box<Self>) -> Result<()>;
}
