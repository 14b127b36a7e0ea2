//! Shared test fixtures: a scriptable chat client stub and graph builders.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use aiflow::llm::{ChatClient, ChatResponse};
use aiflow::runtime::WorkflowEngine;
use aiflow::workflow::types::{Connection, EdgeData, Node, NodeType, Workflow, WorkflowStatus};
use aiflow::workflow::WorkflowStorage;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

type Handler = Box<dyn Fn(&str, &str) -> ChatResponse + Send + Sync>;

/// Chat client driven by a closure, recording every call
pub struct StubChatClient {
    handler: Handler,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubChatClient {
    pub fn with_handler(handler: impl Fn(&str, &str) -> ChatResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text
    pub fn returning(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_, _| ok_response(&text))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Last (system, user) message pair the client was called with
    pub fn last_call(&self) -> Option<(String, String)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

pub fn ok_response(text: &str) -> ChatResponse {
    ChatResponse {
        success: true,
        response: Some(text.to_string()),
        error: None,
        conversation_length: 2,
    }
}

#[async_trait]
impl ChatClient for StubChatClient {
    async fn get_token(&self, _auth_token: &str) -> Result<bool> {
        Ok(true)
    }

    async fn chat_completion(&self, system_message: &str, user_message: &str) -> Result<ChatResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((system_message.to_string(), user_message.to_string()));
        Ok((self.handler)(system_message, user_message))
    }

    async fn embedding(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }

    fn clear_history(&self) {}
}

/// Engine over an in-memory store with the given chat stub
pub async fn test_engine(chat: Arc<dyn ChatClient>) -> Arc<WorkflowEngine> {
    let storage = WorkflowStorage::in_memory().await.unwrap();
    Arc::new(WorkflowEngine::new(storage, chat))
}

/// Persist a workflow so loops and dispatchers can fetch it by id
pub async fn save_workflow(
    engine: &WorkflowEngine,
    id: &str,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
) {
    let mut workflow = Workflow {
        id: id.to_string(),
        name: id.to_string(),
        nodes,
        connections,
        status: WorkflowStatus::Published,
        created_at: String::new(),
        updated_at: String::new(),
    };
    engine.storage().upsert(&mut workflow).await.unwrap();
}

pub fn node(id: &str, node_type: NodeType, config: Value) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        label: None,
        position: None,
        config,
    }
}

pub fn labeled_node(id: &str, label: &str, node_type: NodeType, config: Value) -> Node {
    Node {
        label: Some(label.to_string()),
        ..node(id, node_type, config)
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> Connection {
    Connection {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        data: EdgeData::default(),
    }
}

pub fn labeled_edge(id: &str, source: &str, target: &str, label: &str) -> Connection {
    Connection {
        data: EdgeData {
            label: Some(label.to_string()),
        },
        ..edge(id, source, target)
    }
}

/// A one-node workflow that simply echoes its initial input
pub fn echo_workflow_nodes(trigger_id: &str) -> Vec<Node> {
    vec![node(trigger_id, NodeType::WebhookTrigger, json!({}))]
}
