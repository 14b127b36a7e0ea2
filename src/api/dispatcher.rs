/// Orchestrator dispatcher callback endpoint
///
/// Sub-workflows (or external services acting on their behalf) report a
/// finished step here; the dispatcher advances the owning session.

use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::api::AppState;
use crate::runtime::executors::dispatcher;

/// Callback body: the session and the completed step's result
#[derive(Debug, Deserialize)]
pub struct DispatcherCallbackRequest {
    pub session_id: String,
    pub step_result: Value,
}

pub fn create_dispatcher_routes() -> Router<AppState> {
    Router::new().route("/api/v1/dispatcher/callback", post(dispatcher_callback))
}

/// POST /api/v1/dispatcher/callback
async fn dispatcher_callback(
    State(state): State<AppState>,
    Json(request): Json<DispatcherCallbackRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match dispatcher::process_callback(state.engine.as_ref(), &request.session_id, request.step_result)
        .await
    {
        Ok(result) => Ok((StatusCode::ACCEPTED, Json(result))),
        Err(e) => {
            tracing::warn!("Dispatcher callback failed: {}", e);
            Err((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": e.to_string() })),
            ))
        }
    }
}
