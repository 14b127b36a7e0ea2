/// Timer control endpoints
///
/// `setup-timer` is called by the editor with the timer node and its
/// workflow id; activation is gated on the workflow being published. The
/// remaining routes are list/pause/resume/delete/execute-now.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::workflow::types::{ExecutionResult, Node};

/// Request body for timer setup
#[derive(Debug, Deserialize)]
pub struct SetupTimerRequest {
    pub node: Node,
    pub workflow_id: String,
}

pub fn create_timer_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/setup-timer", post(setup_timer))
        .route("/api/v1/timers", get(list_timers))
        .route("/api/v1/timers/{id}/pause", post(pause_timer))
        .route("/api/v1/timers/{id}/resume", post(resume_timer))
        .route("/api/v1/timers/{id}/execute-now", post(execute_timer_now))
        .route("/api/v1/timers/{id}", delete(delete_timer))
}

/// POST /api/v1/setup-timer
async fn setup_timer(
    State(state): State<AppState>,
    Json(request): Json<SetupTimerRequest>,
) -> Result<Json<Value>, StatusCode> {
    match state.timers.setup_timer(&request.node, &request.workflow_id).await {
        Ok(message) => Ok(Json(json!({ "message": message }))),
        Err(e) => {
            tracing::error!("Failed to set up timer for {}: {}", request.workflow_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/v1/timers
async fn list_timers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "timers": state.timers.list().await }))
}

/// POST /api/v1/timers/:id/pause
async fn pause_timer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.timers.pause(&id).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "message": format!("Timer {} paused.", id) })))
}

/// POST /api/v1/timers/:id/resume
async fn resume_timer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.timers.resume(&id).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "message": format!("Timer {} resumed.", id) })))
}

/// POST /api/v1/timers/:id/execute-now
async fn execute_timer_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResult>, StatusCode> {
    match state.timers.execute_now(&id).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            tracing::error!("Failed to execute timer {} now: {}", id, e);
            Err(StatusCode::NOT_FOUND)
        }
    }
}

/// DELETE /api/v1/timers/:id
async fn delete_timer(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    state.timers.delete(&id).await;
    Json(json!({ "message": format!("Timer {} deleted.", id) }))
}
