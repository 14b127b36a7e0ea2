/// Webhook registration and trigger endpoints
///
/// `create` hands out a fresh webhook id and URL; nothing is persisted
/// here — the editor embeds the id into a webhook_trigger node's config.
/// `trigger` looks the id up across registered workflows and fires the
/// owning workflow as a background task.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AppState;
use crate::workflow::types::{WorkflowExecuteRequest, WorkflowStatus};

/// Request body for webhook creation
#[derive(Debug, Deserialize)]
pub struct WebhookCreateRequest {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Handed-out webhook descriptor
#[derive(Debug, Serialize)]
pub struct WebhookInfo {
    pub webhook_id: String,
    pub workflow_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub url: String,
    pub auth_required: bool,
    pub allowed_ips: Vec<String>,
    pub call_count: u64,
    pub last_called: Option<String>,
}

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/webhooks/create", post(create_webhook))
        .route("/api/v1/webhooks/{id}", post(trigger_webhook))
}

/// POST /api/v1/webhooks/create
async fn create_webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookCreateRequest>,
) -> (StatusCode, Json<WebhookInfo>) {
    let webhook_id = Uuid::new_v4().to_string();
    let url = format!("{}/api/v1/webhooks/{}", state.public_base_url, webhook_id);

    tracing::info!("🔗 Created webhook {} for workflow {}", webhook_id, request.workflow_id);

    (
        StatusCode::CREATED,
        Json(WebhookInfo {
            webhook_id,
            workflow_id: request.workflow_id,
            name: request.name,
            description: request.description,
            created_at: chrono::Utc::now().to_rfc3339(),
            url,
            auth_required: request.auth_required,
            allowed_ips: request.allowed_ips,
            call_count: 0,
            last_called: None,
        }),
    )
}

/// POST /api/v1/webhooks/:id
///
/// 404 when no webhook_trigger node carries the id, 403 when the owning
/// workflow is not published, otherwise 202 — the run itself is
/// fire-and-forget and its failures are only logged.
async fn trigger_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Query(query_params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    tracing::info!("📥 Webhook arrival: {}", webhook_id);

    let (workflow, trigger_node_id) = state
        .registry
        .find_webhook_trigger(&webhook_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    if workflow.status != WorkflowStatus::Published {
        tracing::warn!("❌ Webhook {} hit an unpublished workflow {}", webhook_id, workflow.id);
        return Err(StatusCode::FORBIDDEN);
    }

    // Accept any payload: JSON when it parses, raw text otherwise.
    let body_value: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
        .collect();

    let initial_input = json!({
        "body": body_value,
        "headers": header_map,
        "query_params": query_params,
    });

    let request = WorkflowExecuteRequest::from_workflow(&workflow, Some(trigger_node_id));
    let engine = state.engine.clone();
    let workflow_id = workflow.id.clone();
    tokio::spawn(async move {
        let result = engine.execute(request, initial_input).await;
        if result.success {
            tracing::info!("🎉 Webhook-triggered workflow '{}' completed", workflow_id);
        } else {
            tracing::error!(
                "❌ Webhook-triggered workflow '{}' failed: {}",
                workflow_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message": format!("Workflow {} triggered.", workflow.id),
        })),
    ))
}
