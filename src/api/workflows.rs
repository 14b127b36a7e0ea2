/// Workflow management REST endpoints
///
/// CRUD over stored workflows plus the publish/unpublish lifecycle. Every
/// mutation reloads the hot registry; publication changes re-arm or disarm
/// the workflow's timers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::workflow::types::{
    workflow_id_from_name, Connection, Node, Workflow, WorkflowStatus,
};

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

/// Request body for workflow updates (name and status are kept)
#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workflows", get(list_workflows))
        .route("/api/v1/workflows", post(create_workflow))
        .route("/api/v1/workflows/{id}", get(get_workflow))
        .route("/api/v1/workflows/{id}", put(update_workflow))
        .route("/api/v1/workflows/{id}", delete(delete_workflow))
        .route("/api/v1/workflows/{id}/publish", post(publish_workflow))
        .route("/api/v1/workflows/{id}/unpublish", post(unpublish_workflow))
}

/// GET /api/v1/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.storage.list().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/v1/workflows/:id
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, StatusCode> {
    match state.storage.get(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/workflows
///
/// Derives the id from the slugified name; 400 on an empty slug, 409 when
/// the id is already taken. New workflows start as drafts.
async fn create_workflow(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let workflow_id = workflow_id_from_name(&request.name);
    if workflow_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.storage.get(&workflow_id).await {
        Ok(Some(_)) => return Err(StatusCode::CONFLICT),
        Ok(None) => {}
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    }

    let mut workflow = Workflow {
        id: workflow_id.clone(),
        name: request.name.clone(),
        nodes: request.nodes,
        connections: request.connections,
        status: WorkflowStatus::Draft,
        created_at: String::new(),
        updated_at: String::new(),
    };

    if let Err(e) = state.storage.upsert(&mut workflow).await {
        tracing::error!("Failed to save workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if let Err(e) = state.registry.reload_workflow(&workflow_id).await {
        tracing::error!("Failed to reload workflow into registry: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("📋 Created workflow: {} ({})", workflow_id, request.name);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "workflow_id": workflow_id, "name": request.name })),
    ))
}

/// PUT /api/v1/workflows/:id
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateWorkflowRequest>,
) -> Result<Json<Value>, StatusCode> {
    let mut workflow = match state.storage.get(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    workflow.nodes = request.nodes;
    workflow.connections = request.connections;

    if let Err(e) = state.storage.upsert(&mut workflow).await {
        tracing::error!("Failed to update workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if let Err(e) = state.registry.reload_workflow(&id).await {
        tracing::error!("Failed to reload updated workflow into registry: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Updated workflow: {}", id);
    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow '{}' updated successfully.", id)
    })))
}

/// DELETE /api/v1/workflows/:id
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.timers.deactivate_workflow_timers(&id).await;
    state.registry.remove_workflow(&id);

    match state.storage.delete(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete workflow: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/workflows/:id/publish
///
/// Flips the status and arms a timer for every timer node in the graph.
async fn publish_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let workflow = match state.storage.set_status(&id, WorkflowStatus::Published).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to publish workflow {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if let Err(e) = state.registry.reload_workflow(&id).await {
        tracing::error!("Failed to reload published workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    match state.timers.arm_workflow_timers(&workflow).await {
        Ok(armed) if armed > 0 => {
            tracing::info!("⏰ Armed {} timer(s) for workflow {}", armed, id)
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!("Failed to arm timers for workflow {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow '{}' has been published.", id)
    })))
}

/// POST /api/v1/workflows/:id/unpublish
///
/// Flips the status back to draft and disarms the workflow's timers.
async fn unpublish_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.storage.set_status(&id, WorkflowStatus::Draft).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to unpublish workflow {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    if let Err(e) = state.registry.reload_workflow(&id).await {
        tracing::error!("Failed to reload unpublished workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    state.timers.deactivate_workflow_timers(&id).await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Workflow '{}' has been unpublished and is now a draft.", id)
    })))
}
