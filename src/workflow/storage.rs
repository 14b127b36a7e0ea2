/// SQLite persistence layer for workflow storage
///
/// Workflows are stored as a JSON definition column alongside indexed
/// metadata columns. Every mutation hits the pool before returning, and
/// SQLite serializes concurrent writes to the same row.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use crate::workflow::types::{Workflow, WorkflowStatus};

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

/// One row of the workflow listing: identity, publication status and
/// last-update time, without the graph definition itself
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub updated_at: String,
}

impl WorkflowStorage {
    /// Open (or create) the workflow database under `data_dir`
    pub async fn open(data_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
        let db_path = Path::new(data_dir).join("workflows.db");

        tracing::info!("🗄️ Opening workflow database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory database, used by tests
    ///
    /// A single connection keeps the `:memory:` database alive and shared.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the workflow storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                definition JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    ///
    /// Refreshes `updated_at` and preserves the original `created_at` on
    /// update. The passed workflow's timestamps are adjusted in place so the
    /// caller sees exactly what was written.
    pub async fn upsert(&self, workflow: &mut Workflow) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(existing) = self.get(&workflow.id).await? {
            workflow.created_at = existing.created_at;
        } else if workflow.created_at.is_empty() {
            workflow.created_at = now.clone();
        }
        workflow.updated_at = now;

        let status = serde_json::to_value(workflow.status)?
            .as_str()
            .unwrap_or("draft")
            .to_string();
        let definition = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, status, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&status)
        .bind(&definition)
        .bind(&workflow.created_at)
        .bind(&workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by id
    pub async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                let workflow: Workflow = serde_json::from_str(&definition)?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with basic metadata
    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, status, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::new();
        for row in rows {
            let status: String = row.get("status");
            workflows.push(WorkflowSummary {
                id: row.get("id"),
                name: row.get("name"),
                status: serde_json::from_value(serde_json::Value::String(status))
                    .unwrap_or(WorkflowStatus::Draft),
                updated_at: row.get("updated_at"),
            });
        }

        Ok(workflows)
    }

    /// Load all workflows, used by the registry
    pub async fn load_all(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = Vec::new();
        for row in rows {
            let definition: String = row.get("definition");
            workflows.push(serde_json::from_str(&definition)?);
        }
        Ok(workflows)
    }

    /// Delete a workflow by id, returns whether a row was removed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip the publication status and return the updated workflow
    pub async fn set_status(&self, id: &str, status: WorkflowStatus) -> Result<Option<Workflow>> {
        let Some(mut workflow) = self.get(id).await? else {
            return Ok(None);
        };
        workflow.status = status;
        self.upsert(&mut workflow).await?;
        Ok(Some(workflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, EdgeData, Node, NodeType};
    use serde_json::json;

    fn sample_workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "Sample".to_string(),
            nodes: vec![Node {
                id: "start".to_string(),
                node_type: NodeType::WebhookTrigger,
                label: Some("Start".to_string()),
                position: None,
                config: json!({}),
            }],
            connections: vec![Connection {
                id: "e1".to_string(),
                source: "start".to_string(),
                target: "start".to_string(),
                data: EdgeData::default(),
            }],
            status: WorkflowStatus::Draft,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let mut wf = sample_workflow("sample");
        storage.upsert(&mut wf).await.unwrap();

        let loaded = storage.get("sample").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Sample");
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.status, WorkflowStatus::Draft);
        assert!(!loaded.created_at.is_empty());
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let mut wf = sample_workflow("sample");
        storage.upsert(&mut wf).await.unwrap();
        let created_at = wf.created_at.clone();

        wf.name = "Renamed".to_string();
        storage.upsert(&mut wf).await.unwrap();

        let loaded = storage.get("sample").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Renamed");
        assert_eq!(loaded.created_at, created_at);
    }

    #[tokio::test]
    async fn set_status_persists() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let mut wf = sample_workflow("sample");
        storage.upsert(&mut wf).await.unwrap();

        let updated = storage
            .set_status("sample", WorkflowStatus::Published)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, WorkflowStatus::Published);

        let summaries = storage.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, WorkflowStatus::Published);
    }

    #[tokio::test]
    async fn delete_reports_missing_rows() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let mut wf = sample_workflow("sample");
        storage.upsert(&mut wf).await.unwrap();

        assert!(storage.delete("sample").await.unwrap());
        assert!(!storage.delete("sample").await.unwrap());
        assert!(storage.get("sample").await.unwrap().is_none());
    }
}
