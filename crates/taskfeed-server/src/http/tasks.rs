//! `/tasks` CRUD handlers.
//!
//! Handlers authenticate the caller, then run the blocking mutation service
//! on the blocking pool.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use taskfeed_core::{NewTask, TaskId, TaskPatch, TaskSnapshot};

use super::auth::AuthUser;
use super::error::ApiError;
use crate::mutation::{MutationError, MutationService};
use crate::server::AppState;

/// `GET /tasks` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Tasks to skip.
    #[serde(default)]
    pub skip: u32,
    /// Page size (default 10, max 100).
    pub limit: Option<u32>,
}

/// `POST /tasks`
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskSnapshot>), ApiError> {
    let Json(input) = body.map_err(|e| ApiError::Invalid(e.body_text()))?;
    let task = blocking(&state, move |svc| svc.create(&user, &input)).await?;
    Ok((StatusCode::CREATED, Json(task.snapshot())))
}

/// `GET /tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Invalid(e.body_text()))?;
    let tasks = blocking(&state, move |svc| svc.list(&user, params.skip, params.limit)).await?;
    Ok(Json(tasks.iter().map(taskfeed_core::Task::snapshot).collect()))
}

/// `GET /tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let id = task_id(id)?;
    let task = blocking(&state, move |svc| svc.get(&user, id)).await?;
    Ok(Json(task.snapshot()))
}

/// `PUT /tasks/{id}`
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let id = task_id(id)?;
    let Json(patch) = body.map_err(|e| ApiError::Invalid(e.body_text()))?;
    let task = blocking(&state, move |svc| svc.update(&user, id, &patch)).await?;
    Ok(Json(task.snapshot()))
}

/// `DELETE /tasks/{id}`
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = task_id(id)?;
    blocking(&state, move |svc| svc.delete(&user, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn task_id(path: Result<Path<i64>, PathRejection>) -> Result<TaskId, ApiError> {
    let Path(raw) = path.map_err(|e| ApiError::Invalid(e.body_text()))?;
    Ok(TaskId::new(raw))
}

async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MutationService) -> Result<T, MutationError> + Send + 'static,
{
    let svc = Arc::clone(&state.mutations);
    tokio::task::spawn_blocking(move || op(&svc))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}
