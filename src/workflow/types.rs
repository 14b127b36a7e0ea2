/// Core workflow type definitions
///
/// Defines the fundamental structures for workflows, nodes and connections.
/// These types are serialized/deserialized from JSON for persistence and are
/// shared between the HTTP layer and the execution engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and interpreted by the execution
/// engine. The `status` field gates trigger activation: timers and webhooks
/// only fire for published workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier derived from the slugified name
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<Node>,
    /// List of connections between nodes
    pub connections: Vec<Connection>,
    /// Publication status controlling trigger activation
    #[serde(default)]
    pub status: WorkflowStatus,
    /// RFC 3339 creation timestamp, preserved across updates
    pub created_at: String,
    /// RFC 3339 timestamp of the last mutation
    pub updated_at: String,
}

/// Publication lifecycle of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Editable, triggers inactive
    #[default]
    Draft,
    /// Live, timers and webhooks may fire
    Published,
}

/// A single node in the workflow graph
///
/// Nodes represent discrete processing units (LLM calls, outbound HTTP,
/// conditionals, loops, joins, dispatchers, triggers). The `config` mapping
/// is opaque per node type; templated string fields inside it are expanded
/// at execution time against the run's result pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow
    pub id: String,
    /// The node type, which selects the executor variant
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable alias, usable in templates instead of the id.
    /// Must be unique within the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Editor canvas position, irrelevant to execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Node-specific configuration as flexible JSON
    #[serde(default)]
    pub config: Value,
}

impl Node {
    /// Label if set, otherwise the node id (used in logs and templates)
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// String config value by key
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Boolean config value by key with a default
    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Unsigned integer config value by key with a default
    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }
}

/// Editor canvas coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Available node types for the aiflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// LLM call with templated system/user messages
    /// Expected config: { "systemMessage": "...", "userMessage": "...", "authToken": "...", "clearHistory": false }
    Gigachat,

    /// Outbound HTTP request with templated URL and JSON body
    /// Expected config: { "url": "https://...", "method": "POST", "headers": "K: V", "bodyTemplate": "{...}" }
    Webhook,

    /// Fan-out of a templated JSON array of sub-requests
    /// Expected config: { "jsonInput": "{{...}}", "baseUrl": "...", "executionMode": "sequential", "maxConcurrent": 5 }
    RequestIterator,

    /// Conditional branching on a value at a field path
    /// Expected config: { "conditionType": "equals", "fieldPath": "output.text", "compareValue": "...", "maxGotoIterations": 10 }
    IfElse,

    /// Per-element sub-workflow execution over an input array
    /// Expected config: { "inputArrayPath": "items", "subWorkflowId": "...", "executionMode": "sequential", "skipErrors": true }
    Loop,

    /// Fan-in point merging results from all incoming edges
    /// Expected config: { "mergeStrategy": "combine_text", "separator": "\n\n---\n\n", "waitForAll": true }
    Join,

    /// Delegation to sub-workflows by classification or multi-step plan
    /// Expected config: { "dispatcher_type": "router", "routes": {...} } or { "dispatcher_type": "orchestrator", "availableWorkflows": {...} }
    Dispatcher,

    /// First-node-only schedule trigger emitting a trigger envelope
    /// Expected config: { "interval": 5, "timezone": "UTC" }
    Timer,

    /// First-node-only webhook entry point forwarding the HTTP arrival payload
    /// Expected config: { "webhookId": "<uuid>" }
    WebhookTrigger,

    /// Outbound email stub returning a structured acknowledgement
    Email,

    /// Database query stub returning a structured acknowledgement
    Database,
}

impl NodeType {
    /// Whether this node type may serve as the entry point of a run
    pub fn is_startable(self) -> bool {
        matches!(
            self,
            NodeType::Gigachat | NodeType::Webhook | NodeType::WebhookTrigger | NodeType::Timer
        )
    }
}

/// Connection between two nodes in the workflow graph
///
/// The optional `data.label` carries branch routing for if/else nodes:
/// `"true"` / `"false"`, with a `":goto"` suffix marking a legal cycle edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique edge identifier
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Optional edge metadata (branch label)
    #[serde(default)]
    pub data: EdgeData,
}

/// Edge metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Request body for direct workflow execution
///
/// Carries a full graph rather than a workflow id so the editor can execute
/// unsaved drafts. `start_node_id` overrides start-node selection; `input`
/// seeds the run's initial data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecuteRequest {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default, rename = "startNodeId", skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl WorkflowExecuteRequest {
    /// Build an execution request from a stored workflow
    pub fn from_workflow(workflow: &Workflow, start_node_id: Option<String>) -> Self {
        Self {
            nodes: workflow.nodes.clone(),
            connections: workflow.connections.clone(),
            start_node_id,
            input: None,
        }
    }
}

/// Outcome of one workflow run
///
/// `result` is the (possibly partial) result pool keyed by node id; on
/// failure it carries whatever completed before the error so partial state
/// stays inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>, result: Map<String, Value>, logs: Vec<LogEntry>) -> Self {
        Self {
            success: false,
            result: Some(result),
            error: Some(error.into()),
            logs,
        }
    }
}

/// One structured log line emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub level: String,
    pub message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(node_id: &str, level: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            level: level.to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Derive a workflow id from its name
///
/// Lowercases, replaces whitespace runs with `_` and strips everything
/// outside `[a-z0-9_]`. An empty result means the name is unusable and the
/// caller must reject it.
pub fn workflow_id_from_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_slugifies_name() {
        assert_eq!(workflow_id_from_name("My Test Flow"), "my_test_flow");
        assert_eq!(workflow_id_from_name("  Spaced   Out  "), "spaced_out");
        assert_eq!(workflow_id_from_name("data-sync v2!"), "datasync_v2");
    }

    #[test]
    fn workflow_id_rejects_only_symbols() {
        assert_eq!(workflow_id_from_name("!!!"), "");
        assert_eq!(workflow_id_from_name("Тест"), "");
    }

    #[test]
    fn node_type_round_trips_snake_case() {
        let json = serde_json::json!({
            "id": "n1",
            "type": "request_iterator",
            "config": {}
        });
        let node: Node = serde_json::from_value(json).unwrap();
        assert_eq!(node.node_type, NodeType::RequestIterator);
        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], "request_iterator");
    }

    #[test]
    fn startable_types() {
        assert!(NodeType::WebhookTrigger.is_startable());
        assert!(NodeType::Timer.is_startable());
        assert!(!NodeType::Join.is_startable());
        assert!(!NodeType::Loop.is_startable());
    }
}
