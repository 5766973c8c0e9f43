//! Task mutations: validate, apply in a transaction, then emit.
//!
//! Every write runs in its own store transaction. The domain event is built
//! and handed to the [`EventSink`] only after the commit returns, so a failed
//! write never reaches subscribers. All methods block on the store; async
//! callers run them on `spawn_blocking`.

use std::sync::Arc;

use metrics::counter;
use taskfeed_core::{
    DomainEvent, EventKind, NewTask, Task, TaskId, TaskPatch, UserId, ValidationError,
};
use taskfeed_store::{StoreError, TaskStore, TaskTransaction};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::metrics::TASK_MUTATIONS_TOTAL;
use crate::websocket::event_router::EventSink;

/// Page size when the caller gives none.
pub const DEFAULT_LIST_LIMIT: u32 = 10;

/// Largest page a caller may request.
pub const MAX_LIST_LIMIT: u32 = 100;

/// Why a task operation failed.
#[derive(Debug, Error)]
pub enum MutationError {
    /// Input failed validation; no transaction was opened.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// No such task for this owner.
    #[error("task {0} not found")]
    NotFound(TaskId),
    /// The store failed; any transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl MutationError {
    /// Metrics label.
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
        }
    }
}

type Result<T> = std::result::Result<T, MutationError>;

/// Create/update/delete tasks and publish the result.
pub struct MutationService {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn EventSink>,
}

impl MutationService {
    /// Create a service writing to `store` and publishing to `sink`.
    pub fn new(store: Arc<dyn TaskStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Create a task owned by `owner`.
    #[instrument(skip_all, fields(user_id = %owner))]
    pub fn create(&self, owner: &UserId, input: &NewTask) -> Result<Task> {
        let result = self.create_inner(owner, input);
        record(EventKind::TaskCreated, &result);
        result
    }

    fn create_inner(&self, owner: &UserId, input: &NewTask) -> Result<Task> {
        input.validate()?;
        let task = self.in_transaction(|tx| Ok(tx.insert(owner, input)?))?;
        self.emit(&DomainEvent::TaskCreated(task.snapshot()));
        Ok(task)
    }

    /// Apply `patch` to one of `owner`'s tasks.
    #[instrument(skip_all, fields(user_id = %owner, task_id = %id))]
    pub fn update(&self, owner: &UserId, id: TaskId, patch: &TaskPatch) -> Result<Task> {
        let result = self.update_inner(owner, id, patch);
        record(EventKind::TaskUpdated, &result);
        result
    }

    fn update_inner(&self, owner: &UserId, id: TaskId, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        self.ensure_exists(owner, id)?;
        let task = self.in_transaction(|tx| {
            tx.update(owner, id, patch)?
                .ok_or(MutationError::NotFound(id))
        })?;
        self.emit(&DomainEvent::TaskUpdated(task.snapshot()));
        Ok(task)
    }

    /// Delete one of `owner`'s tasks.
    #[instrument(skip_all, fields(user_id = %owner, task_id = %id))]
    pub fn delete(&self, owner: &UserId, id: TaskId) -> Result<()> {
        let result = self.delete_inner(owner, id);
        record(EventKind::TaskDeleted, &result);
        result
    }

    fn delete_inner(&self, owner: &UserId, id: TaskId) -> Result<()> {
        self.ensure_exists(owner, id)?;
        self.in_transaction(|tx| {
            if tx.delete(owner, id)? {
                Ok(())
            } else {
                Err(MutationError::NotFound(id))
            }
        })?;
        self.emit(&DomainEvent::TaskDeleted(id));
        Ok(())
    }

    /// Read one task. Never emits.
    pub fn get(&self, owner: &UserId, id: TaskId) -> Result<Task> {
        self.store
            .get(owner, id)?
            .ok_or(MutationError::NotFound(id))
    }

    /// Page through `owner`'s tasks. Never emits.
    pub fn list(&self, owner: &UserId, skip: u32, limit: Option<u32>) -> Result<Vec<Task>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        Ok(self.store.list(owner, skip, limit)?)
    }

    fn ensure_exists(&self, owner: &UserId, id: TaskId) -> Result<()> {
        match self.store.get(owner, id)? {
            Some(_) => Ok(()),
            None => Err(MutationError::NotFound(id)),
        }
    }

    /// Run `apply` in a fresh transaction; roll back on error, commit on
    /// success.
    fn in_transaction<T>(
        &self,
        apply: impl FnOnce(&mut dyn TaskTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.store.begin()?;
        match apply(tx.as_mut()) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn emit(&self, event: &DomainEvent) {
        debug!(event = %event.kind(), task_id = %event.task_id(), "committed");
        self.sink.on_commit(event);
    }
}

fn record<T>(kind: EventKind, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    counter!(TASK_MUTATIONS_TOTAL, "kind" => kind.as_str(), "outcome" => outcome).increment(1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::config::RegistryConfig;
    use crate::websocket::event_router::EventRouter;
    use crate::websocket::registry::{ConnectionRegistry, RegistryError};
    use crate::websocket::testing::{CountingTransport, StaticValidator, eventually};
    use crate::websocket::transport::CloseReason;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use taskfeed_auth::{AuthError, JwtTokenService};
    use taskfeed_store::SqliteTaskStore;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DomainEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<DomainEvent> {
            self.events.lock().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn on_commit(&self, event: &DomainEvent) {
            self.events.lock().push(event.clone());
        }
    }

    /// Wraps the real store; can make writes or commits fail.
    struct FlakyStore {
        inner: SqliteTaskStore,
        fail_apply: AtomicBool,
        fail_commit: AtomicBool,
        rollbacks: Arc<AtomicUsize>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteTaskStore::in_memory().unwrap(),
                fail_apply: AtomicBool::new(false),
                fail_commit: AtomicBool::new(false),
                rollbacks: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FlakyTx {
        inner: Box<dyn TaskTransaction>,
        fail_apply: bool,
        fail_commit: bool,
        rollbacks: Arc<AtomicUsize>,
    }

    fn injected() -> StoreError {
        StoreError::Corrupt {
            table: "tasks",
            message: "injected failure".into(),
        }
    }

    impl TaskStore for FlakyStore {
        fn get(&self, owner: &UserId, id: TaskId) -> taskfeed_store::Result<Option<Task>> {
            self.inner.get(owner, id)
        }

        fn list(&self, owner: &UserId, skip: u32, limit: u32) -> taskfeed_store::Result<Vec<Task>> {
            self.inner.list(owner, skip, limit)
        }

        fn begin(&self) -> taskfeed_store::Result<Box<dyn TaskTransaction>> {
            Ok(Box::new(FlakyTx {
                inner: self.inner.begin()?,
                fail_apply: self.fail_apply.load(Ordering::SeqCst),
                fail_commit: self.fail_commit.load(Ordering::SeqCst),
                rollbacks: Arc::clone(&self.rollbacks),
            }))
        }
    }

    impl TaskTransaction for FlakyTx {
        fn insert(&mut self, owner: &UserId, task: &NewTask) -> taskfeed_store::Result<Task> {
            if self.fail_apply {
                return Err(injected());
            }
            self.inner.insert(owner, task)
        }

        fn update(
            &mut self,
            owner: &UserId,
            id: TaskId,
            patch: &TaskPatch,
        ) -> taskfeed_store::Result<Option<Task>> {
            if self.fail_apply {
                return Err(injected());
            }
            self.inner.update(owner, id, patch)
        }

        fn delete(&mut self, owner: &UserId, id: TaskId) -> taskfeed_store::Result<bool> {
            if self.fail_apply {
                return Err(injected());
            }
            self.inner.delete(owner, id)
        }

        fn commit(self: Box<Self>) -> taskfeed_store::Result<()> {
            if self.fail_commit {
                self.inner.rollback()?;
                return Err(injected());
            }
            self.inner.commit()
        }

        fn rollback(self: Box<Self>) -> taskfeed_store::Result<()> {
            let _ = self.rollbacks.fetch_add(1, Ordering::SeqCst);
            self.inner.rollback()
        }
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn service() -> (MutationService, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        (MutationService::new(store, sink.clone()), sink)
    }

    fn flaky_service() -> (MutationService, Arc<FlakyStore>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(FlakyStore::new());
        (MutationService::new(store.clone(), sink.clone()), store, sink)
    }

    #[test]
    fn create_emits_once_after_commit() {
        let (svc, sink) = service();
        let task = svc.create(&alice(), &NewTask::titled("Buy milk")).unwrap();
        assert_eq!(sink.events(), [DomainEvent::TaskCreated(task.snapshot())]);
        assert_eq!(svc.get(&alice(), task.id).unwrap(), task);
    }

    #[test]
    fn invalid_input_never_touches_store() {
        let (svc, store, sink) = flaky_service();
        let err = svc.create(&alice(), &NewTask::titled("   ")).unwrap_err();
        assert_matches!(err, MutationError::Invalid(ValidationError::EmptyTitle));
        assert!(sink.events().is_empty());
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 0);
        assert!(svc.list(&alice(), 0, None).unwrap().is_empty());
    }

    #[test]
    fn update_emits_updated_snapshot() {
        let (svc, sink) = service();
        let task = svc.create(&alice(), &NewTask::titled("Buy milk")).unwrap();
        let updated = svc
            .update(&alice(), task.id, &TaskPatch::completed(true))
            .unwrap();
        assert!(updated.completed);
        assert_eq!(
            sink.events().last(),
            Some(&DomainEvent::TaskUpdated(updated.snapshot()))
        );
    }

    #[test]
    fn update_missing_is_not_found_without_event() {
        let (svc, sink) = service();
        let err = svc
            .update(&alice(), TaskId::new(404), &TaskPatch::completed(true))
            .unwrap_err();
        assert_matches!(err, MutationError::NotFound(id) if id.get() == 404);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn other_users_task_is_not_found() {
        let (svc, sink) = service();
        let task = svc.create(&alice(), &NewTask::titled("mine")).unwrap();
        let bob = UserId::from("bob");
        assert_matches!(svc.get(&bob, task.id), Err(MutationError::NotFound(_)));
        assert_matches!(svc.delete(&bob, task.id), Err(MutationError::NotFound(_)));
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn delete_emits_deleted() {
        let (svc, sink) = service();
        let task = svc.create(&alice(), &NewTask::titled("temp")).unwrap();
        svc.delete(&alice(), task.id).unwrap();
        assert_eq!(sink.events().last(), Some(&DomainEvent::TaskDeleted(task.id)));
        assert_matches!(svc.get(&alice(), task.id), Err(MutationError::NotFound(_)));
    }

    #[test]
    fn failed_apply_rolls_back_and_emits_nothing() {
        let (svc, store, sink) = flaky_service();
        store.fail_apply.store(true, Ordering::SeqCst);
        let err = svc.create(&alice(), &NewTask::titled("doomed")).unwrap_err();
        assert_matches!(err, MutationError::Storage(_));
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn failed_commit_emits_nothing() {
        let (svc, store, sink) = flaky_service();
        let task = svc.create(&alice(), &NewTask::titled("kept")).unwrap();
        store.fail_commit.store(true, Ordering::SeqCst);

        let err = svc
            .update(&alice(), task.id, &TaskPatch::completed(true))
            .unwrap_err();
        assert_matches!(err, MutationError::Storage(_));
        assert_eq!(sink.events().len(), 1);
        assert!(!svc.get(&alice(), task.id).unwrap().completed);
    }

    #[test]
    fn list_applies_default_and_max_limit() {
        let (svc, _sink) = service();
        for i in 0..12 {
            let _ = svc.create(&alice(), &NewTask::titled(format!("t{i}"))).unwrap();
        }
        assert_eq!(svc.list(&alice(), 0, None).unwrap().len(), 10);
        assert_eq!(svc.list(&alice(), 10, None).unwrap().len(), 2);
        assert_eq!(svc.list(&alice(), 0, Some(1_000)).unwrap().len(), 12);
    }

    fn wired() -> (Arc<ConnectionRegistry>, MutationService) {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(StaticValidator),
            RegistryConfig::default(),
        ));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry)));
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        (registry, MutationService::new(store, router))
    }

    fn parse(frames: &[String]) -> Vec<serde_json::Value> {
        frames
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn two_subscribers_see_create_then_only_remaining_sees_update() {
        let (registry, svc) = wired();
        let (ta, a) = CountingTransport::new();
        let (tb, b) = CountingTransport::new();
        let a_id = registry.subscribe(Box::new(ta), "user-a").await.unwrap();
        let _ = registry.subscribe(Box::new(tb), "user-b").await.unwrap();

        let task = svc
            .create(&UserId::from("user-a"), &NewTask::titled("Buy milk"))
            .unwrap();

        for probe in [&a, &b] {
            eventually(|| probe.events().len() == 1).await;
            let frames = parse(&probe.events());
            assert_eq!(frames[0]["event"], "task_created");
            assert_eq!(frames[0]["task_id"], task.id.get());
            assert_eq!(frames[0]["task"]["title"], "Buy milk");
            assert_eq!(frames[0]["task"]["completed"], false);
        }

        registry.unsubscribe(a_id).await;
        assert_eq!(registry.connection_count(), 1);

        let _ = svc
            .update(&UserId::from("user-a"), task.id, &TaskPatch::completed(true))
            .unwrap();

        eventually(|| b.events().len() == 2).await;
        let frames = parse(&b.events());
        assert_eq!(frames[1]["event"], "task_updated");
        assert_eq!(frames[1]["task"]["completed"], true);
        assert_eq!(a.events().len(), 1);
        assert_eq!(a.close_count(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refused_and_sees_nothing() {
        let tokens = Arc::new(JwtTokenService::new("scenario-secret"));
        let registry = Arc::new(ConnectionRegistry::new(
            tokens.clone(),
            RegistryConfig::default(),
        ));
        let expired = tokens
            .issue_expiring(
                &UserId::from("user-a"),
                chrono::Utc::now() - chrono::Duration::minutes(1),
            )
            .unwrap();

        let (transport, probe) = CountingTransport::new();
        let err = registry
            .subscribe(Box::new(transport), &expired)
            .await
            .unwrap_err();
        assert_matches!(err, RegistryError::Unauthenticated(AuthError::Expired));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(probe.close_reasons(), [CloseReason::Unauthenticated]);

        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let svc = MutationService::new(store, Arc::new(EventRouter::new(registry)));
        let _ = svc
            .create(&UserId::from("user-b"), &NewTask::titled("unseen"))
            .unwrap();
        assert!(probe.sent().is_empty());
    }
}
