/// GigaChat node executor
///
/// Calls the LLM with templated system/user messages and returns the
/// response as text, plus a parsed `json` field when the (fence-stripped)
/// response happens to be valid JSON.

use anyhow::Result;
use serde_json::{json, Value};

use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::Node;

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let started = std::time::Instant::now();
    tracing::info!("🤖 Executing GigaChat node: {}", node.id);

    let auth_token = node
        .config_str("authToken")
        .map(str::to_string)
        .or_else(|| std::env::var("GIGACHAT_AUTH_TOKEN").ok());

    let clear_history = node.config_bool("clearHistory", false);
    let system_template = node.config_str("systemMessage").unwrap_or("You are a helpful assistant");
    let user_template = node.config_str("userMessage").unwrap_or("");

    let system_message = ctx.resolve(system_template);
    let user_message = ctx.resolve(user_template);

    if user_template != user_message {
        tracing::debug!("📝 User message before expansion: {}", user_template);
        tracing::debug!("📝 User message after expansion: {}", user_message);
    }

    let auth_token = auth_token.ok_or_else(|| {
        anyhow::anyhow!(
            "GigaChat: auth token is not configured in the node and GIGACHAT_AUTH_TOKEN is not set"
        )
    })?;
    if user_message.is_empty() {
        anyhow::bail!("GigaChat: user message is empty after template expansion");
    }

    let chat = ctx.engine.chat();
    if clear_history {
        chat.clear_history();
    }
    if !chat.get_token(&auth_token).await? {
        anyhow::bail!("GigaChat: failed to obtain access token");
    }

    let completion = chat.chat_completion(&system_message, &user_message).await?;
    if !completion.success {
        anyhow::bail!(
            "GigaChat: {}",
            completion.error.unwrap_or_else(|| "Unknown error".to_string())
        );
    }

    let raw_text = completion.text().to_string();
    let cleaned_text = template::strip_code_fences(&raw_text).to_string();
    if cleaned_text != raw_text {
        tracing::info!("🧹 GigaChat returned Markdown, extracted fenced JSON");
    }

    // `json` is populated iff the cleaned response parses.
    let parsed_json: Value = serde_json::from_str(&cleaned_text).unwrap_or(Value::Null);

    Ok(json!({
        "text": cleaned_text,
        "json": parsed_json,
        "meta": {
            "node_type": "gigachat",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "execution_time_ms": started.elapsed().as_millis() as u64,
            "conversation_length": completion.conversation_length,
            "length": raw_text.len(),
            "words": raw_text.split_whitespace().count(),
            "id_node": node.id,
        },
        "inputs": {
            "system_message_template": system_template,
            "user_message_template": user_template,
            "final_system_message": system_message,
            "final_user_message": user_message,
            "clear_history": clear_history,
        },
    }))
}
