/// Database node executor (query stub)
///
/// Resolves the templated query and returns a structured acknowledgement;
/// no live database connection is made.

use anyhow::Result;
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::workflow::types::Node;

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let query = ctx.resolve(node.config_str("query").unwrap_or(""));
    let connection = node.config_str("connection").unwrap_or("postgres");

    if query.is_empty() {
        anyhow::bail!("Database node: query is not specified");
    }

    tracing::info!("🗄️ Executing SQL query on connection '{}'", connection);
    tracing::debug!("📝 Query: {}", query);

    Ok(json!({
        "success": true,
        "rows": [
            {
                "id": 1,
                "text": "Sample Data",
                "created_at": chrono::Utc::now().to_rfc3339(),
            }
        ],
        "rowCount": 1,
        "query": query,
        "connection": connection,
    }))
}
