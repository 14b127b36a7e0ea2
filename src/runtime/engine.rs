/// Graph execution engine
///
/// Interprets a workflow graph: resolves execution order with a BFS work
/// queue, threads data between nodes, handles if/else branching, join
/// fan-in, GOTO cycles and sub-workflow recursion. Each run owns its own
/// result pool, join buffers and goto counters; nothing leaks between runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::llm::ChatClient;
use crate::runtime::executors::dispatcher::DispatcherSessions;
use crate::runtime::executors::{self, NodeContext};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{
    Connection, ExecutionResult, LogEntry, Node, NodeType, WorkflowExecuteRequest,
};

/// Default ceiling on GOTO iterations per edge
const DEFAULT_MAX_GOTO_ITERATIONS: u64 = 10;

/// Workflow execution engine
///
/// Shared across all concurrent runs; per-run state lives on the stack of
/// `execute`. The engine also hosts the cross-run dispatcher session map and
/// the node-status buffer consumed by the editor.
pub struct WorkflowEngine {
    storage: WorkflowStorage,
    chat: Arc<dyn ChatClient>,
    sessions: DispatcherSessions,
    /// Latest result per node id, read-and-cleared by `/node-status`
    node_status: RwLock<HashMap<String, Value>>,
}

/// Internal petgraph representation of a workflow
///
/// Edge weights carry the connection label used for if/else branch routing.
struct WorkflowGraph {
    graph: DiGraph<Node, Option<String>>,
    id_to_index: HashMap<String, NodeIndex>,
}

impl WorkflowGraph {
    /// Build the graph, validating node uniqueness and edge endpoints
    fn build(nodes: &[Node], connections: &[Connection]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::new();
        let mut labels = HashSet::new();

        for node in nodes {
            if id_to_index.contains_key(&node.id) {
                anyhow::bail!("Duplicate node id '{}'", node.id);
            }
            if let Some(label) = &node.label {
                if !labels.insert(label.clone()) {
                    anyhow::bail!("Duplicate node label '{}'", label);
                }
            }
            let index = graph.add_node(node.clone());
            id_to_index.insert(node.id.clone(), index);
        }

        for conn in connections {
            let from = id_to_index
                .get(&conn.source)
                .ok_or_else(|| anyhow::anyhow!("Edge references unknown node: {}", conn.source))?;
            let to = id_to_index
                .get(&conn.target)
                .ok_or_else(|| anyhow::anyhow!("Edge references unknown node: {}", conn.target))?;
            graph.add_edge(*from, *to, conn.data.label.clone());
        }

        Ok(Self { graph, id_to_index })
    }

    fn node(&self, id: &str) -> Option<&Node> {
        self.id_to_index.get(id).map(|idx| &self.graph[*idx])
    }

    /// Source node ids of all incoming edges
    fn incoming_sources(&self, id: &str) -> Vec<String> {
        let Some(idx) = self.id_to_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .map(|edge| self.graph[edge.source()].id.clone())
            .collect()
    }

    /// (target id, edge label) of all outgoing edges
    fn outgoing(&self, id: &str) -> Vec<(String, Option<String>)> {
        let Some(idx) = self.id_to_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .map(|edge| (self.graph[edge.target()].id.clone(), edge.weight().clone()))
            .collect()
    }

    /// Pick the run's entry point when no explicit start node is given
    ///
    /// Prefers a startable node without incoming edges, then falls back to
    /// the first startable node in declaration order.
    fn select_start_node(&self, nodes: &[Node]) -> Option<String> {
        nodes
            .iter()
            .find(|n| n.node_type.is_startable() && self.incoming_sources(&n.id).is_empty())
            .or_else(|| nodes.iter().find(|n| n.node_type.is_startable()))
            .map(|n| n.id.clone())
    }
}

/// Per-run mutable state
struct RunState {
    pool: Map<String, Value>,
    executed: HashSet<String>,
    logs: Vec<LogEntry>,
    goto_counts: HashMap<(String, String), u64>,
}

impl WorkflowEngine {
    pub fn new(storage: WorkflowStorage, chat: Arc<dyn ChatClient>) -> Self {
        Self {
            storage,
            chat,
            sessions: DispatcherSessions::new(),
            node_status: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    pub fn chat(&self) -> &dyn ChatClient {
        self.chat.as_ref()
    }

    pub fn sessions(&self) -> &DispatcherSessions {
        &self.sessions
    }

    /// Execute a workflow graph
    ///
    /// Boxed so `loop` and `dispatcher` executors can recurse into the
    /// engine for sub-workflows.
    pub fn execute<'a>(
        &'a self,
        request: WorkflowExecuteRequest,
        initial_input: Value,
    ) -> BoxFuture<'a, ExecutionResult> {
        Box::pin(async move { self.execute_inner(request, initial_input).await })
    }

    async fn execute_inner(
        &self,
        request: WorkflowExecuteRequest,
        initial_input: Value,
    ) -> ExecutionResult {
        let graph = match WorkflowGraph::build(&request.nodes, &request.connections) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!("❌ Workflow validation failed: {}", e);
                return ExecutionResult::failure(e.to_string(), Map::new(), Vec::new());
            }
        };

        let start_node_id = match request
            .start_node_id
            .clone()
            .or_else(|| graph.select_start_node(&request.nodes))
        {
            Some(id) => id,
            None => {
                return ExecutionResult::failure("No start node found", Map::new(), Vec::new());
            }
        };

        // Labels take precedence over ids when templates name a source.
        let label_to_id: HashMap<String, String> = request
            .nodes
            .iter()
            .map(|n| (n.display_label().to_string(), n.id.clone()))
            .collect();

        tracing::info!("🚀 Starting workflow execution from node: {}", start_node_id);

        let mut state = RunState {
            pool: Map::new(),
            executed: HashSet::new(),
            logs: Vec::new(),
            goto_counts: HashMap::new(),
        };

        let mut queue: VecDeque<(String, Value)> = VecDeque::new();
        queue.push_back((start_node_id, initial_input));

        while let Some((node_id, mut input_data)) = queue.pop_front() {
            if state.executed.contains(&node_id) {
                continue;
            }
            let Some(node) = graph.node(&node_id) else {
                continue;
            };

            // Join fan-in: wait until every incoming branch has reported,
            // then hand the buffered results over as `{inputs: ...}`.
            if node.node_type == NodeType::Join {
                let expected = graph.incoming_sources(&node_id);
                let received: Map<String, Value> = expected
                    .iter()
                    .filter_map(|src| state.pool.get(src).map(|v| (src.clone(), v.clone())))
                    .collect();

                let wait_for_all = node.config_bool("waitForAll", true);
                if wait_for_all && received.len() < expected.len() {
                    tracing::debug!(
                        "⏳ Join node {} waiting: {}/{} sources reported",
                        node_id,
                        received.len(),
                        expected.len()
                    );
                    continue;
                }
                input_data = json!({ "inputs": received });
            }

            tracing::info!("📍 Executing node {} ({:?})", node.id, node.node_type);
            state.logs.push(LogEntry::new(
                &node.id,
                "info",
                format!("Executing node {}", node.display_label()),
            ));

            let result = {
                let ctx = NodeContext {
                    engine: self,
                    label_to_id: &label_to_id,
                    input: &input_data,
                    results: &state.pool,
                };
                executors::execute_node(node, &ctx).await
            };

            let mut result = match result {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("❌ Error executing node {}: {}", node.id, e);
                    state.logs.push(LogEntry::new(&node.id, "error", e.to_string()));
                    return ExecutionResult::failure(e.to_string(), state.pool, state.logs);
                }
            };

            // Carry the dispatcher context across intermediate nodes so a
            // sub-workflow can always find its way back to its session.
            if let Some(dispatcher_context) = input_data.get("dispatcher_context") {
                if let Value::Object(map) = &mut result {
                    if !map.contains_key("dispatcher_context") {
                        map.insert("dispatcher_context".to_string(), dispatcher_context.clone());
                    }
                }
            }

            state.pool.insert(node.id.clone(), result.clone());
            state.executed.insert(node.id.clone());
            self.node_status
                .write()
                .await
                .insert(node.id.clone(), result.clone());

            state.logs.push(
                LogEntry::new(
                    &node.id,
                    "success",
                    format!("Node {} executed successfully", node.display_label()),
                )
                .with_data(result.clone()),
            );

            // Route to the next nodes.
            if node.node_type == NodeType::IfElse {
                let branch = result
                    .get("branch")
                    .and_then(|b| b.as_str())
                    .unwrap_or("false")
                    .to_string();

                for (target, edge_label) in graph.outgoing(&node_id) {
                    let edge_label = edge_label.unwrap_or_else(|| "true".to_string());
                    let is_goto = edge_label.contains(":goto");
                    let actual_label = edge_label.split(':').next().unwrap_or("");

                    if actual_label != branch {
                        continue;
                    }
                    if !is_goto && state.executed.contains(&target) {
                        continue;
                    }

                    if is_goto {
                        let key = (node_id.clone(), target.clone());
                        let count = state.goto_counts.entry(key).or_insert(0);
                        *count += 1;
                        let max_gotos =
                            node.config_u64("maxGotoIterations", DEFAULT_MAX_GOTO_ITERATIONS);
                        if *count > max_gotos {
                            let message = format!(
                                "GOTO limit ({}) exceeded for {}->{}",
                                max_gotos, node_id, target
                            );
                            tracing::error!("❌ {}", message);
                            state.logs.push(LogEntry::new(&node.id, "error", message.clone()));
                            return ExecutionResult::failure(message, state.pool, state.logs);
                        }
                        tracing::info!(
                            "↪️ GOTO: jumping from {} to {} (iteration {})",
                            node_id,
                            target,
                            count
                        );

                        // Allow the target and the if/else itself to re-run.
                        state.executed.remove(&target);
                        state.executed.remove(&node_id);
                        state.pool.remove(&target);
                        state.pool.remove(&node_id);
                    }

                    queue.push_back((target, result.clone()));
                }
            } else {
                for (target, _) in graph.outgoing(&node_id) {
                    if !state.executed.contains(&target) {
                        queue.push_back((target, result.clone()));
                    }
                }
            }
        }

        tracing::info!("🎉 Workflow execution completed, {} nodes in pool", state.pool.len());
        ExecutionResult {
            success: true,
            result: Some(state.pool),
            error: None,
            logs: state.logs,
        }
    }

    /// Return the latest results for the given node ids and clear them
    pub async fn take_node_results(&self, node_ids: &[String]) -> HashMap<String, Value> {
        let mut buffer = self.node_status.write().await;
        node_ids
            .iter()
            .filter_map(|id| buffer.remove(id).map(|v| (id.clone(), v)))
            .collect()
    }
}
