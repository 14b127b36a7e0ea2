/// Node execution handlers
///
/// One executor per node kind, each a function over the node, the current
/// input and the run's result pool. Executors that launch sub-workflows
/// (`loop`, `dispatcher`) recurse into the engine through the context.

pub mod database;
pub mod dispatcher;
pub mod email;
pub mod gigachat;
pub mod if_else;
pub mod join;
pub mod loop_node;
pub mod request_iterator;
pub mod trigger;
pub mod webhook;

use std::collections::HashMap;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::runtime::engine::WorkflowEngine;
use crate::template;
use crate::workflow::types::{Node, NodeType};

/// Execution context handed to every node executor
///
/// `input` is the producing node's result (or the run's initial input for
/// the first node); `results` is the accumulated result pool, so templates
/// can reach any prior result by label or id.
pub struct NodeContext<'a> {
    pub engine: &'a WorkflowEngine,
    pub label_to_id: &'a HashMap<String, String>,
    pub input: &'a Value,
    pub results: &'a Map<String, Value>,
}

impl NodeContext<'_> {
    /// Expand `{{ ... }}` templates against this context
    pub fn resolve(&self, template_str: &str) -> String {
        template::replace_templates(template_str, self.input, self.label_to_id, self.results)
    }
}

/// Dispatch a node to its executor
pub async fn execute_node(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    match node.node_type {
        NodeType::Gigachat => gigachat::execute(node, ctx).await,
        NodeType::Webhook => webhook::execute(node, ctx).await,
        NodeType::RequestIterator => request_iterator::execute(node, ctx).await,
        NodeType::IfElse => if_else::execute(node, ctx),
        NodeType::Loop => loop_node::execute(node, ctx).await,
        NodeType::Join => join::execute(node, ctx),
        NodeType::Dispatcher => dispatcher::execute(node, ctx).await,
        NodeType::Timer => trigger::execute_timer(node),
        NodeType::WebhookTrigger => trigger::execute_webhook_trigger(node, ctx),
        NodeType::Email => email::execute(node, ctx).await,
        NodeType::Database => database::execute(node, ctx).await,
    }
}
