/// Direct execution endpoints
///
/// Runs a graph handed over the wire (saved or not) and exposes the
/// read-and-clear node-status buffer the editor polls for live results.

use axum::{extract::State, response::Json, routing::post, Router};
use serde_json::{json, Value};

use crate::api::AppState;
use crate::workflow::types::{ExecutionResult, WorkflowExecuteRequest};

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/execute-workflow", post(execute_workflow))
        .route("/api/v1/node-status", post(node_status))
}

/// POST /api/v1/execute-workflow
async fn execute_workflow(
    State(state): State<AppState>,
    Json(mut request): Json<WorkflowExecuteRequest>,
) -> Json<ExecutionResult> {
    let initial_input = request.input.take().unwrap_or_else(|| json!({}));
    let result = state.engine.execute(request, initial_input).await;
    Json(result)
}

/// POST /api/v1/node-status
///
/// Returns the latest results for the requested node ids, then clears them.
async fn node_status(
    State(state): State<AppState>,
    Json(node_ids): Json<Vec<String>>,
) -> Json<Value> {
    let results = state.engine.take_node_results(&node_ids).await;
    Json(json!({ "results": results }))
}
