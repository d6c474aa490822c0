//! Admin REST endpoints for inspecting background tasks.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::info;

use crate::tasks::{TaskId, TaskOrchestrator};

/// Build the Axum router for the task API.
pub fn task_routes(orchestrator: TaskOrchestrator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks/stats", get(task_stats))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/users/{id}/task", get(get_user_task))
        .with_state(orchestrator)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "weekly-report-bot",
    }))
}

async fn task_stats(State(orchestrator): State<TaskOrchestrator>) -> impl IntoResponse {
    Json(orchestrator.get_stats().await)
}

async fn get_task(
    State(orchestrator): State<TaskOrchestrator>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task_id = match id.parse::<TaskId>() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid task ID"})),
            );
        }
    };

    match orchestrator.get_task_info(task_id).await {
        Some(record) => (StatusCode::OK, Json(json!(record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Task not found"})),
        ),
    }
}

async fn cancel_task(
    State(orchestrator): State<TaskOrchestrator>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task_id = match id.parse::<TaskId>() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid task ID"})),
            );
        }
    };

    if orchestrator.cancel_task(task_id).await {
        info!(task_id = %task_id, "Task cancelled via API");
        return (StatusCode::OK, Json(json!({"status": "cancelled"})));
    }

    match orchestrator.get_task_info(task_id).await {
        Some(record) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "Task already finished", "status": record.status})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Task not found"})),
        ),
    }
}

async fn get_user_task(
    State(orchestrator): State<TaskOrchestrator>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    match orchestrator.get_user_task(user_id).await {
        Some(record) => (StatusCode::OK, Json(json!(record))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User has no task"})),
        ),
    }
}
