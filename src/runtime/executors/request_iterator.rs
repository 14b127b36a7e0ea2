/// Request iterator node executor
///
/// Receives a templated JSON array of sub-requests and dispatches them
/// sequentially or in parallel (bounded by `maxConcurrent`). Per-request
/// failures are recorded as structured responses and never abort the node.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};

use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::Node;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// A sub-request after validation, or the structured error that replaces it
enum Prepared {
    Invalid(Value),
    Call {
        method: String,
        url: String,
        params: Option<Map<String, Value>>,
        body: Option<Value>,
        headers: Map<String, Value>,
    },
}

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let started = std::time::Instant::now();
    tracing::info!("Executing request iterator node: {}", node.id);

    let json_input_template = node
        .config_str("jsonInput")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!("Request iterator: 'jsonInput' template is not configured in the node settings")
        })?;

    let mut resolved = ctx.resolve(json_input_template);
    if resolved.trim().is_empty() || resolved == json_input_template {
        tracing::warn!(
            "Template '{}' could not be resolved, assuming empty request list",
            json_input_template
        );
        resolved = "[]".to_string();
    }

    let requests_list = match template::parse_loose(&resolved) {
        Ok(Value::Array(items)) => items,
        Ok(single @ Value::Object(_)) => vec![single],
        Ok(_) => anyhow::bail!("Request iterator: parsed input is not a list or a single request object"),
        Err(e) => anyhow::bail!("Request iterator: invalid JSON input after template replacement: {}", e),
    };

    if requests_list.is_empty() {
        tracing::info!("Request iterator: no requests to process");
        return Ok(json!({
            "text": "[]",
            "json": [],
            "meta": {
                "executed_requests_count": 0,
                "successful_requests_count": 0,
                "failed_requests_count": 0,
            },
            "inputs": { "jsonInput_template": json_input_template },
        }));
    }

    let base_url = node.config_str("baseUrl").unwrap_or("").trim_end_matches('/').to_string();
    let execution_mode = node.config_str("executionMode").unwrap_or("sequential");
    let max_concurrent = node.config_u64("maxConcurrent", DEFAULT_MAX_CONCURRENT as u64) as usize;
    let common_headers: Map<String, Value> = node
        .config_str("commonHeaders")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    let prepared: Vec<Prepared> = requests_list
        .iter()
        .map(|req| prepare(req, &base_url, &common_headers))
        .collect();

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .context("failed to build request iterator HTTP client")?;

    let responses: Vec<Value> = if execution_mode == "parallel" {
        stream::iter(prepared)
            .map(|p| run_prepared(&client, p))
            .buffered(max_concurrent.max(1))
            .collect()
            .await
    } else {
        let mut out = Vec::with_capacity(prepared.len());
        for p in prepared {
            out.push(run_prepared(&client, p).await);
        }
        out
    };

    let successful = responses
        .iter()
        .filter(|r| r.get("success").and_then(|s| s.as_bool()).unwrap_or(false))
        .count();
    let failed = responses.len() - successful;

    tracing::info!("Request iterator: processed {} requests ({} failed)", responses.len(), failed);

    Ok(json!({
        "text": serde_json::to_string_pretty(&responses).unwrap_or_default(),
        "json": responses,
        "meta": {
            "node_type": "request_iterator",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "execution_time_ms": started.elapsed().as_millis() as u64,
            "executed_requests_count": successful + failed,
            "successful_requests_count": successful,
            "failed_requests_count": failed,
        },
        "inputs": {
            "baseUrl": base_url,
            "executionMode": execution_mode,
            "jsonInput_template": json_input_template,
        },
    }))
}

/// Validate one request item and resolve its final URL
fn prepare(req: &Value, base_url: &str, common_headers: &Map<String, Value>) -> Prepared {
    let Some(req_obj) = req.as_object() else {
        tracing::warn!("Skipping invalid request item (not an object): {}", req);
        return Prepared::Invalid(json!({
            "error": "Invalid request item format",
            "item_data": req,
            "success": false,
        }));
    };

    let endpoint = req_obj.get("endpoint").and_then(|e| e.as_str()).unwrap_or("");
    if endpoint.is_empty() {
        return Prepared::Invalid(json!({
            "error": "Missing endpoint",
            "item_data": req,
            "success": false,
        }));
    }

    let is_absolute = endpoint.to_lowercase().starts_with("http://")
        || endpoint.to_lowercase().starts_with("https://");
    let url = if is_absolute {
        endpoint.to_string()
    } else if base_url.is_empty() {
        tracing::warn!("Request iterator: relative endpoint '{}' with no baseUrl, skipping", endpoint);
        return Prepared::Invalid(json!({
            "error": "Relative endpoint with no baseUrl",
            "item_data": req,
            "success": false,
        }));
    } else {
        format!("{}/{}", base_url, endpoint.trim_start_matches('/'))
    };

    let method = req_obj
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("GET")
        .to_uppercase();

    let params = if method == "GET" {
        req_obj.get("params").and_then(|p| p.as_object()).cloned()
    } else {
        None
    };
    let body = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        req_obj.get("body").cloned()
    } else {
        None
    };

    let mut headers = common_headers.clone();
    if let Some(specific) = req_obj.get("headers").and_then(|h| h.as_object()) {
        for (k, v) in specific {
            headers.insert(k.clone(), v.clone());
        }
    }

    Prepared::Call { method, url, params, body, headers }
}

async fn run_prepared(client: &reqwest::Client, prepared: Prepared) -> Value {
    match prepared {
        Prepared::Invalid(error) => error,
        Prepared::Call { method, url, params, body, headers } => {
            make_single_request(client, &method, &url, params, body, headers).await
        }
    }
}

/// Make a single HTTP request and return a structured response
///
/// Failures become mock responses (503 connection, 504 timeout, 500 other)
/// so downstream nodes always see one entry per request.
async fn make_single_request(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    params: Option<Map<String, Value>>,
    body: Option<Value>,
    headers: Map<String, Value>,
) -> Value {
    let request_details = json!({
        "request_url": url,
        "request_method": method,
        "request_params": params,
        "request_body": body,
        "request_headers": headers,
    });

    let Ok(method_parsed) = method.parse::<reqwest::Method>() else {
        return with_details(request_details, json!({
            "status_code": 500,
            "response_data": {"error": "Unexpected Error", "details": format!("Unsupported method: {}", method)},
            "success": false,
            "mock_reason": "Unexpected Error",
        }));
    };

    tracing::info!("🌍 Making {} request to {}", method, url);

    let mut request = client.request(method_parsed, url);
    if let Some(params) = &params {
        let query: HashMap<&String, String> = params
            .iter()
            .map(|(k, v)| (k, match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
            .collect();
        request = request.query(&query);
    }
    if let Some(body) = &body {
        request = request.json(body);
    }
    for (key, value) in &headers {
        if let Some(value) = value.as_str() {
            request = request.header(key, value);
        }
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let response_headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                .collect();
            let text = response.text().await.unwrap_or_default();
            let response_data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

            tracing::info!("✅ Response from {}: {}", url, status);
            with_details(request_details, json!({
                "status_code": status.as_u16(),
                "response_headers": response_headers,
                "response_data": response_data,
                "success": status.is_success(),
            }))
        }
        Err(e) if e.is_timeout() => {
            tracing::error!("⏰ Timeout error for {}", url);
            with_details(request_details, json!({
                "status_code": 504,
                "response_data": {"error": "Timeout Error", "details": "Request timed out after 10 seconds"},
                "success": false,
                "mock_reason": "Timeout Error",
            }))
        }
        Err(e) if e.is_connect() => {
            tracing::error!("❌ Connection error for {}: {}", url, e);
            with_details(request_details, json!({
                "status_code": 503,
                "response_data": {"error": "Connection Error", "details": e.to_string()},
                "success": false,
                "mock_reason": "Connection Error",
            }))
        }
        Err(e) => {
            tracing::error!("💥 Unexpected error for {}: {}", url, e);
            with_details(request_details, json!({
                "status_code": 500,
                "response_data": {"error": "Unexpected Error", "details": e.to_string()},
                "success": false,
                "mock_reason": "Unexpected Error",
            }))
        }
    }
}

fn with_details(details: Value, extra: Value) -> Value {
    let mut out = details.as_object().cloned().unwrap_or_default();
    if let Value::Object(extra) = extra {
        out.extend(extra);
    }
    Value::Object(out)
}
