//! REST surface for task CRUD.

pub mod auth;
pub mod error;
pub mod tasks;

use axum::Router;
use axum::routing::get;

use crate::server::AppState;

/// Task routes, to be merged into the main router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
}
