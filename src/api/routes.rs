//! Route handlers. Every response is a JSON snapshot of persisted/in-memory
//! state — no endpoint here mutates anything but the scheduler refresh
//! trigger, which only re-reads settings already written elsewhere.

use super::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/queue/tasks", get(list_all_tasks))
        .route("/queue/tasks/pending", get(list_pending_tasks))
        .route("/queue/tasks/running", get(list_running_tasks))
        .route("/queue/tasks/:id", get(task_status))
        .route("/scheduler/jobs", get(list_jobs))
        .route("/scheduler/refresh", post(trigger_refresh))
        .route("/activity", get(recent_activity))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

async fn list_all_tasks(State(state): State<AppState>) -> Response {
    match state.queue.get_all().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_pending_tasks(State(state): State<AppState>) -> Response {
    match state.queue.get_pending().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_running_tasks(State(state): State<AppState>) -> Response {
    match state.queue.get_running().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn task_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.queue.get_task_status(&id).await {
        Ok(Some(status)) => Json(json!({"task_id": id, "status": status})).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("queue task {id} not found")).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Response {
    Json(json!({"job_ids": state.jobs.list_job_ids().await})).into_response()
}

async fn trigger_refresh(State(state): State<AppState>) -> Response {
    state.jobs.control_plane().refresh_expert_schedules(None).await;
    Json(json!({"status": "refresh queued"})).into_response()
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<i64>,
}

async fn recent_activity(State(state): State<AppState>, Query(q): Query<ActivityQuery>) -> Response {
    match state.db.list_recent_activity(q.limit.unwrap_or(100)).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error(e),
    }
}
