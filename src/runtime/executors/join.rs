/// Join node executor
///
/// Merges the results of all incoming branches. Fields carrying the same
/// value in every input are promoted to the top level; per-source uniques
/// are isolated under `join_result.sources` and combined according to the
/// merge strategy.

use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::runtime::executors::NodeContext;
use crate::workflow::types::Node;

pub fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let merge_strategy = node.config_str("mergeStrategy").unwrap_or("combine_text");
    let separator = node
        .config_str("separator")
        .unwrap_or("\n\n---\n\n")
        .replace("\\n", "\n");

    tracing::info!("🔀 Executing join node: {} ({})", node.id, merge_strategy);

    let inputs = match ctx.input.get("inputs").and_then(|v| v.as_object()) {
        Some(map) if !map.is_empty() => map,
        _ => {
            let mut result = match ctx.input {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            result.insert("join_result".to_string(), json!({"error": "No inputs to join"}));
            result.insert("success".to_string(), json!(false));
            return Ok(Value::Object(result));
        }
    };

    // A single reporting branch passes straight through.
    if inputs.len() == 1 {
        return Ok(inputs.values().next().cloned().unwrap_or(Value::Null));
    }

    let input_objects: Vec<(&String, Map<String, Value>)> = inputs
        .iter()
        .map(|(source, value)| {
            let map = value.as_object().cloned().unwrap_or_default();
            (source, map)
        })
        .collect();

    // Promote fields common (same key, same value) to every input.
    let mut common = Map::new();
    if let Some((_, first)) = input_objects.first() {
        for (key, value) in first {
            if input_objects[1..]
                .iter()
                .all(|(_, other)| other.get(key) == Some(value))
            {
                common.insert(key.clone(), value.clone());
            }
        }
    }
    tracing::debug!("🔍 Common fields: {:?}", common.keys().collect::<Vec<_>>());

    // What remains is unique per source.
    let mut sources = Map::new();
    for (source, map) in &input_objects {
        let unique: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !common.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        sources.insert((*source).clone(), Value::Object(unique));
    }

    let output = match merge_strategy {
        "combine_text" => {
            let texts: Vec<String> = sources
                .iter()
                .map(|(source, unique)| format!("=== Source {} ===\n{}", source, extract_text(unique)))
                .collect();
            json!({
                "text": texts.join(&separator),
                "source_count": inputs.len(),
            })
        }
        "merge_json" => {
            json!({
                "json": sources,
                "text": serde_json::to_string_pretty(&sources).unwrap_or_default(),
                "source_count": inputs.len(),
            })
        }
        other => anyhow::bail!("Unknown merge strategy: {}", other),
    };

    let mut result = common;
    result.insert(
        "join_result".to_string(),
        json!({
            "sources": sources,
            "metadata": {
                "source_count": inputs.len(),
                "source_ids": inputs.keys().collect::<Vec<_>>(),
                "merge_strategy": merge_strategy,
                "merge_time": chrono::Utc::now().to_rfc3339(),
            },
        }),
    );
    result.insert("output".to_string(), output);
    result.insert("success".to_string(), json!(true));

    Ok(Value::Object(result))
}

/// Recursively find the most suitable text inside a value
fn extract_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                return text.clone();
            }
            if let Some(Value::String(text)) = map.get("output").and_then(|o| o.get("text")) {
                return text.clone();
            }
            for value in map.values() {
                match value {
                    Value::Object(_) => {
                        let found = extract_text(value);
                        if !found.is_empty() {
                            return found;
                        }
                    }
                    Value::String(s) => return s.clone(),
                    _ => {}
                }
            }
            serde_json::to_string_pretty(data).unwrap_or_default()
        }
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::WorkflowEngine;
    use crate::workflow::types::NodeType;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NoopChat;

    #[async_trait::async_trait]
    impl crate::llm::ChatClient for NoopChat {
        async fn get_token(&self, _auth_token: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn chat_completion(
            &self,
            _system: &str,
            _user: &str,
        ) -> anyhow::Result<crate::llm::ChatResponse> {
            Ok(crate::llm::ChatResponse::failure("noop"))
        }
        async fn embedding(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(Vec::new())
        }
        fn clear_history(&self) {}
    }

    fn join_node(strategy: &str) -> Node {
        Node {
            id: "join-1".to_string(),
            node_type: NodeType::Join,
            label: None,
            position: None,
            config: json!({"mergeStrategy": strategy}),
        }
    }

    async fn run_join(strategy: &str, input: Value) -> Value {
        let storage = crate::workflow::storage::WorkflowStorage::in_memory()
            .await
            .unwrap();
        let engine = WorkflowEngine::new(storage, Arc::new(NoopChat));
        let labels = HashMap::new();
        let results = Map::new();
        let ctx = NodeContext {
            engine: &engine,
            label_to_id: &labels,
            input: &input,
            results: &results,
        };
        execute(&join_node(strategy), &ctx).unwrap()
    }

    #[tokio::test]
    async fn merge_json_splits_common_and_unique() {
        let input = json!({
            "inputs": {
                "a": {"user": "alice", "color": "red"},
                "b": {"user": "alice", "color": "blue"},
            }
        });
        let result = run_join("merge_json", input).await;

        assert_eq!(result["user"], "alice");
        assert_eq!(result["join_result"]["sources"]["a"]["color"], "red");
        assert_eq!(result["join_result"]["sources"]["b"]["color"], "blue");
        assert!(result["join_result"]["sources"]["a"].get("user").is_none());
        assert_eq!(result["success"], true);
        assert_eq!(result["output"]["source_count"], 2);
    }

    #[tokio::test]
    async fn combine_text_concatenates_sources() {
        let input = json!({
            "inputs": {
                "a": {"text": "first"},
                "b": {"text": "second"},
            }
        });
        let result = run_join("combine_text", input).await;
        let text = result["output"]["text"].as_str().unwrap();
        assert!(text.contains("=== Source a ===\nfirst"));
        assert!(text.contains("=== Source b ===\nsecond"));
        assert!(text.contains("---"));
    }

    #[tokio::test]
    async fn single_input_passes_through() {
        let input = json!({"inputs": {"only": {"text": "solo", "success": true}}});
        let result = run_join("merge_json", input).await;
        assert_eq!(result, json!({"text": "solo", "success": true}));
    }

    #[tokio::test]
    async fn missing_inputs_reports_error() {
        let result = run_join("merge_json", json!({"other": 1})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["join_result"]["error"], "No inputs to join");
    }
}
