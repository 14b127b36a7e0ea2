/// Outbound webhook node executor
///
/// Sends an HTTP request with a templated URL and JSON body. Non-2xx
/// responses are valid results (`meta.success = false`); transport failures
/// abort the node and thus the run.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::Node;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let started = std::time::Instant::now();
    tracing::info!("Executing webhook node: {}", node.id);

    let url_template = node.config_str("url").unwrap_or("");
    let method = node.config_str("method").unwrap_or("POST").to_uppercase();
    let headers_str = node.config_str("headers").unwrap_or("Content-Type: application/json");
    let body_template = node.config_str("bodyTemplate").unwrap_or("{}");

    let url = ctx.resolve(url_template);
    if url.is_empty() {
        anyhow::bail!("Webhook: URL is required in the node settings");
    }

    let headers = parse_header_lines(headers_str);

    let payload = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        let resolved_body = ctx.resolve(body_template);
        if resolved_body.trim().is_empty() {
            None
        } else {
            Some(template::parse_loose(&resolved_body).map_err(|e| {
                anyhow::anyhow!(
                    "Webhook node {}: failed to parse bodyTemplate: {}",
                    node.id,
                    e
                )
            })?)
        }
    } else {
        None
    };

    tracing::info!("🌐 Sending {} to {}", method, url);

    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .context("failed to build webhook HTTP client")?;

    let mut request = client.request(
        method
            .parse()
            .map_err(|_| anyhow::anyhow!("Unsupported HTTP method: {}", method))?,
        &url,
    );
    for (key, value) in &headers {
        request = request.header(key, value);
    }
    if let Some(payload) = &payload {
        request = request.json(payload);
    }

    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Connection error in webhook node {}: {}", node.id, e))?;

    let status = response.status();
    let response_headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
        .collect();

    let response_text = response
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read webhook response body: {}", e))?;
    let response_json: Value = serde_json::from_str(&response_text).unwrap_or(Value::Null);

    tracing::info!("✅ Webhook response: {}", status);

    Ok(json!({
        "text": response_text,
        "json": response_json,
        "meta": {
            "node_type": "webhook",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "execution_time_ms": started.elapsed().as_millis() as u64,
            "success": status.is_success(),
            "status_code": status.as_u16(),
            "response_headers": response_headers,
        },
        "inputs": {
            "url_template": url_template,
            "final_url": url,
            "method": method,
            "headers": headers,
            "body_template": body_template,
            "final_payload": payload,
        },
    }))
}

/// Parse a newline-separated `Key: Value` header block
fn parse_header_lines(headers_str: &str) -> HashMap<String, String> {
    headers_str
        .lines()
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Resolve the request a webhook node would send, without sending it
///
/// Used by direct tests of template-into-request wiring.
pub fn prepare_request(node: &Node, ctx: &NodeContext<'_>) -> Result<(String, Option<Value>)> {
    let url = ctx.resolve(node.config_str("url").unwrap_or(""));
    let body_template = node.config_str("bodyTemplate").unwrap_or("{}");
    let resolved_body = ctx.resolve(body_template);
    let payload = if resolved_body.trim().is_empty() {
        None
    } else {
        Some(template::parse_loose(&resolved_body)?)
    };
    Ok((url, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lines_parse() {
        let headers = parse_header_lines("Content-Type: application/json\nX-Token: abc");
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(headers.get("X-Token").unwrap(), "abc");
    }

    #[test]
    fn header_lines_skip_garbage() {
        let headers = parse_header_lines("no separator line\nA: 1");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("A").unwrap(), "1");
    }
}
