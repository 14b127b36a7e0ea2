/// Trigger node executors
///
/// Timer and webhook-trigger nodes are run entry points. When the engine
/// reaches them they only synthesize the run's starting data; scheduling
/// and HTTP arrival are owned by the timer manager and the webhook routes.

use anyhow::Result;
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::workflow::types::Node;

/// Emit the schedule trigger envelope
pub fn execute_timer(node: &Node) -> Result<Value> {
    tracing::info!("⏰ Timer node {} starting a scheduled run", node.id);

    let interval = node.config_u64("interval", 5);
    let timezone = node.config_str("timezone").unwrap_or("UTC");
    let now = chrono::Utc::now().to_rfc3339();

    Ok(json!({
        "success": true,
        "message": format!("Workflow triggered by schedule at {}", now),
        "output": {
            "text": format!("Workflow triggered by schedule at {}", now),
            "timestamp": now,
            "interval": interval,
            "timezone": timezone,
            "node_id": node.id,
        },
    }))
}

/// Forward the HTTP arrival payload the run was started with
pub fn execute_webhook_trigger(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    tracing::info!("🔔 Webhook trigger node {} executed", node.id);
    Ok(json!({
        "success": true,
        "output": ctx.input.clone(),
    }))
}
