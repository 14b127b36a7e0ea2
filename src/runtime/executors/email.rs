/// Email node executor (delivery stub)
///
/// Resolves the templated fields and returns a structured acknowledgement;
/// actual delivery is out of scope.

use anyhow::Result;
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::workflow::types::Node;

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let to = ctx.resolve(node.config_str("to").unwrap_or(""));
    let subject = ctx.resolve(node.config_str("subject").unwrap_or(""));
    let body = ctx.resolve(node.config_str("body").unwrap_or(""));

    if to.is_empty() {
        anyhow::bail!("Email node: recipient (to) is not specified");
    }

    tracing::info!("📧 Sending email to {}", to);
    tracing::debug!("📋 Subject: {}", subject);
    tracing::debug!("📄 Body: {:.100}", body);

    Ok(json!({
        "sent": true,
        "to": to,
        "subject": subject,
        "messageId": format!("msg_{}", chrono::Utc::now().timestamp()),
    }))
}
