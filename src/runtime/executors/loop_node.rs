/// Loop node executor
///
/// Fetches an array at a configured path and runs a named sub-workflow for
/// each element with `{item, loop_index}` as the initial input. Sequential
/// or parallel (bounded by `maxConcurrent`), with optional batching; results
/// keep the element order.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::{Node, WorkflowExecuteRequest};

const DEFAULT_MAX_CONCURRENT: usize = 5;

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let started = std::time::Instant::now();

    let array_path = node.config_str("inputArrayPath").unwrap_or("items");
    let sub_workflow_id = node
        .config_str("subWorkflowId")
        .ok_or_else(|| anyhow::anyhow!("Loop node: subWorkflowId is required"))?;
    let execution_mode = node.config_str("executionMode").unwrap_or("sequential");
    let max_concurrent = node.config_u64("maxConcurrent", DEFAULT_MAX_CONCURRENT as u64) as usize;
    let skip_errors = node.config_bool("skipErrors", true);
    let batch_size = node.config_u64("batchSize", 0) as usize;

    tracing::info!("🔍 Loop node {} looking for array at path: {}", node.id, array_path);

    let array = resolve_array(array_path, ctx)
        .ok_or_else(|| anyhow::anyhow!("Loop node: no data found at path '{}'", array_path))?;
    let Value::Array(items) = array else {
        anyhow::bail!("Loop node: input at path '{}' is not a list", array_path);
    };

    let sub_workflow = ctx
        .engine
        .storage()
        .get(sub_workflow_id)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!("Loop node: subWorkflow with ID '{}' not found", sub_workflow_id)
        })?;
    let request = WorkflowExecuteRequest::from_workflow(&sub_workflow, None);

    let run_item = |item: Value, idx: usize| {
        let request = request.clone();
        Box::pin(async move {
            let sub_input = json!({ "item": item, "loop_index": idx });
            let result = ctx.engine.execute(request, sub_input).await;
            if !result.success && !skip_errors {
                anyhow::bail!(
                    "Loop item {} failed: {}",
                    idx,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            if !result.success {
                tracing::error!(
                    "❌ Sub-workflow failed for item {}: {}",
                    idx,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(json!({
                "success": result.success,
                "result": result.result,
                "item": item,
                "index": idx,
                "error": result.error,
            }))
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send + '_>>
    };

    let batches: Vec<&[Value]> = if batch_size > 0 && items.len() > batch_size {
        tracing::info!(
            "🔢 Processing array in {} batches of size {}",
            items.len().div_ceil(batch_size),
            batch_size
        );
        items.chunks(batch_size).collect()
    } else {
        vec![&items[..]]
    };

    let mut results: Vec<Value> = Vec::with_capacity(items.len());
    let mut offset = 0;
    for batch in batches {
        if execution_mode == "parallel" {
            let mut futs = Vec::with_capacity(batch.len());
            for (i, item) in batch.iter().enumerate() {
                futs.push(run_item(item.clone(), offset + i));
            }
            let outcomes: Vec<Result<Value>> = stream::iter(futs)
                .buffered(max_concurrent.max(1))
                .collect()
                .await;
            for outcome in outcomes {
                results.push(outcome?);
            }
        } else {
            for (i, item) in batch.iter().enumerate() {
                results.push(run_item(item.clone(), offset + i).await?);
            }
        }
        offset += batch.len();
    }

    let success_count = results
        .iter()
        .filter(|r| r.get("success").and_then(|s| s.as_bool()).unwrap_or(true))
        .count();
    let error_count = results.len() - success_count;

    Ok(json!({
        "results": results,
        "summary": {
            "total": items.len(),
            "executed": results.len(),
            "success_count": success_count,
            "error_count": error_count,
            "execution_mode": execution_mode,
            "execution_time_ms": started.elapsed().as_millis() as u64,
        },
        "output": {
            "text": format!(
                "Processed {} items with {} successes and {} errors",
                items.len(), success_count, error_count
            ),
            "json": results,
        },
    }))
}

/// Locate the input array
///
/// The head of the path may name a prior node (label or id) in the result
/// pool, the literal `input`, or a field of the current input. When nothing
/// is found, a list sitting in the input's `json` field is used as a last
/// resort.
fn resolve_array(array_path: &str, ctx: &NodeContext<'_>) -> Option<Value> {
    let (head, rest) = array_path.split_once('.').unwrap_or((array_path, ""));

    let found = if let Some(source) = ctx.label_to_id.get(head).and_then(|id| ctx.results.get(id)) {
        template::lookup_path(source, rest)
    } else if head == "input" {
        template::lookup_path(ctx.input, rest)
    } else {
        template::lookup_path(ctx.input, array_path)
    };

    match found {
        Some(value) if !value.is_null() => Some(value.clone()),
        _ => match ctx.input.get("json") {
            Some(list @ Value::Array(_)) => {
                tracing::warn!(
                    "⚠️ No data at '{}', falling back to the list in the input's 'json' field",
                    array_path
                );
                Some(list.clone())
            }
            _ => None,
        },
    }
}
