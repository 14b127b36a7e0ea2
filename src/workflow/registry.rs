/// Hot-reload workflow registry using ArcSwap
///
/// Lock-free, atomic in-memory mirror of the workflow store. Webhook
/// trigger lookups scan it on every arrival without touching SQLite, and
/// each workflow mutation swaps the whole map pointer, so concurrent runs
/// are never blocked by an update.

use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{NodeType, Workflow, WorkflowStatus};

/// Lock-free workflow registry
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Thread-safe atomic pointer to the workflow map
    workflows: ArcSwap<HashMap<String, Workflow>>,
    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage at startup
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all().await?;
        let map: HashMap<String, Workflow> =
            stored.into_iter().map(|wf| (wf.id.clone(), wf)).collect();

        self.workflows.store(Arc::new(map));
        tracing::info!(
            "📊 Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );
        Ok(())
    }

    /// Reload a single workflow from storage after a mutation
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), workflow);
        self.workflows.store(Arc::new(next));

        tracing::info!("🔥 Hot-reloaded workflow: {}", workflow_id);
        Ok(())
    }

    /// Remove a workflow from the registry
    pub fn remove_workflow(&self, workflow_id: &str) {
        let current = self.workflows.load();
        let mut next = (**current).clone();
        if next.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(next));
            tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        }
    }

    /// Get a workflow by id (lock-free read)
    pub fn get(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Find the workflow owning a `webhook_trigger` node with the given id
    ///
    /// Scans every registered workflow regardless of status so the trigger
    /// layer can distinguish "no such webhook" (404) from "webhook on an
    /// unpublished workflow" (403). Returns the workflow and the trigger
    /// node's id.
    pub fn find_webhook_trigger(&self, webhook_id: &str) -> Option<(Workflow, String)> {
        let workflows = self.workflows.load();
        for workflow in workflows.values() {
            for node in &workflow.nodes {
                if node.node_type == NodeType::WebhookTrigger
                    && node.config_str("webhookId") == Some(webhook_id)
                {
                    return Some((workflow.clone(), node.id.clone()));
                }
            }
        }
        None
    }

    /// All published workflows
    pub fn published(&self) -> Vec<Workflow> {
        self.workflows
            .load()
            .values()
            .filter(|wf| wf.status == WorkflowStatus::Published)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Node;
    use serde_json::json;

    async fn seeded_registry() -> WorkflowRegistry {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let mut wf = Workflow {
            id: "hooked".to_string(),
            name: "Hooked".to_string(),
            nodes: vec![Node {
                id: "trigger".to_string(),
                node_type: NodeType::WebhookTrigger,
                label: None,
                position: None,
                config: json!({"webhookId": "abc-123"}),
            }],
            connections: vec![],
            status: WorkflowStatus::Published,
            created_at: String::new(),
            updated_at: String::new(),
        };
        storage.upsert(&mut wf).await.unwrap();

        let registry = WorkflowRegistry::new(storage);
        registry.init_from_storage().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn finds_webhook_trigger_by_id() {
        let registry = seeded_registry().await;
        let (workflow, node_id) = registry.find_webhook_trigger("abc-123").unwrap();
        assert_eq!(workflow.id, "hooked");
        assert_eq!(node_id, "trigger");
        assert!(registry.find_webhook_trigger("missing").is_none());
    }

    #[tokio::test]
    async fn remove_drops_lookup() {
        let registry = seeded_registry().await;
        registry.remove_workflow("hooked");
        assert!(registry.get("hooked").is_none());
        assert!(registry.find_webhook_trigger("abc-123").is_none());
    }
}
