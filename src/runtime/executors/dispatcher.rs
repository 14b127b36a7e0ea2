/// Dispatcher node executor
///
/// Two coordination modes over sub-workflows:
/// - router: classifies the user query (LLM or keywords) and delegates to
///   the matching route's workflow;
/// - orchestrator: builds a multi-step plan with the LLM, tracks progress in
///   a per-dispatcher session and advances on sub-workflow callbacks,
///   optionally re-planning after every step in agent mode.
///
/// Sessions are process-local; losing them on restart is acceptable, but a
/// callback for an unknown session must fail cleanly.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::runtime::engine::WorkflowEngine;
use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::{Node, WorkflowExecuteRequest};

/// One step of an orchestrator plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub workflow_id: String,
    #[serde(default)]
    pub description: String,
}

/// Orchestrator session state
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherSession {
    pub session_id: String,
    pub dispatcher_id: String,
    pub plan: Vec<PlanStep>,
    pub current_step: usize,
    pub initial_query: String,
    pub execution_history: Vec<Value>,
    pub is_agent_mode: bool,
    pub dispatcher_config: Value,
    pub created_at: String,
}

/// Session store keyed `dispatcher_id -> session_id -> session`
///
/// Callbacks do not carry the dispatcher id, so lookup scans all
/// dispatchers for the session id. That is O(D); D is small.
#[derive(Debug, Default)]
pub struct DispatcherSessions {
    inner: RwLock<HashMap<String, HashMap<String, DispatcherSession>>>,
}

impl DispatcherSessions {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, session: DispatcherSession) {
        let mut map = self.inner.write().await;
        map.entry(session.dispatcher_id.clone())
            .or_default()
            .insert(session.session_id.clone(), session);
    }

    /// Remove and return a session; callers re-insert it when the plan
    /// continues, which makes each callback atomic per session id.
    async fn take(&self, dispatcher_id: &str, session_id: &str) -> Option<DispatcherSession> {
        let mut map = self.inner.write().await;
        map.get_mut(dispatcher_id)?.remove(session_id)
    }

    /// Find which dispatcher owns a session id
    async fn find_dispatcher(&self, session_id: &str) -> Option<String> {
        let map = self.inner.read().await;
        map.iter()
            .find(|(_, sessions)| sessions.contains_key(session_id))
            .map(|(dispatcher_id, _)| dispatcher_id.clone())
    }

    /// Whether any dispatcher currently holds the session
    pub async fn contains(&self, session_id: &str) -> bool {
        self.find_dispatcher(session_id).await.is_some()
    }
}

pub async fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let dispatcher_type = node
        .config_str("dispatcher_type")
        .or_else(|| node.config_str("dispatcherType"))
        .unwrap_or("router");

    tracing::info!("🎯 Executing dispatcher {} in {} mode", node.id, dispatcher_type);

    match dispatcher_type {
        "router" => execute_router(node, ctx).await,
        "orchestrator" => execute_orchestrator(node, ctx).await,
        other => anyhow::bail!("Unknown dispatcher type: {}", other),
    }
}

/// Run the named workflow with the given initial input, returning the full
/// execution result as a value
async fn launch_workflow_by_id(
    engine: &WorkflowEngine,
    workflow_id: &str,
    input: Value,
) -> Result<Value> {
    let workflow = engine
        .storage()
        .get(workflow_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Workflow {} not found among saved workflows", workflow_id))?;

    tracing::info!("🚀 Launching workflow {}", workflow_id);
    let result = engine
        .execute(WorkflowExecuteRequest::from_workflow(&workflow, None), input)
        .await;
    Ok(serde_json::to_value(result)?)
}

// --- Router mode ---

async fn execute_router(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let query_template = node
        .config_str("userQueryTemplate")
        .filter(|t| !t.is_empty())
        .unwrap_or("{{ input.output.text }}");
    let user_query = ctx.resolve(query_template).trim().to_string();
    if user_query.is_empty() {
        anyhow::bail!("Dispatcher: user query not found in input data");
    }

    let routes = node
        .config
        .get("routes")
        .and_then(|r| r.as_object())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Dispatcher: routes are not configured"))?;

    let mut category = "default".to_string();

    if node.config_bool("useAI", true) {
        let auth_token = node
            .config_str("dispatcherAuthToken")
            .ok_or_else(|| anyhow::anyhow!("Dispatcher: auth token is required for AI mode"))?;

        // The prompt contract uses the placeholder tokens of the GigaChat
        // dispatcher configs: `{категории}` and `{запрос пользователя}`.
        let prompt_template = node.config_str("dispatcherPrompt").unwrap_or(
            "Определи категорию запроса: {категории}. Запрос: {запрос пользователя}. Ответь одним словом.",
        );
        let categories: Vec<&str> = routes.keys().map(String::as_str).collect();
        let classification_prompt = prompt_template
            .replace("{категории}", &categories.join(", "))
            .replace("{запрос пользователя}", &user_query);
        tracing::debug!("AI classification prompt: {}", classification_prompt);

        let chat = ctx.engine.chat();
        if chat.get_token(auth_token).await? {
            let completion = chat
                .chat_completion("You are a request classifier.", &classification_prompt)
                .await?;
            if completion.success {
                let answer = completion.text().trim().to_lowercase();
                if routes.contains_key(&answer) {
                    category = answer;
                }
            } else {
                tracing::error!(
                    "Classification call failed: {}. Falling back to 'default' category",
                    completion.error.as_deref().unwrap_or("unknown error")
                );
            }
        } else {
            tracing::error!("Dispatcher: failed to obtain chat token, falling back to 'default'");
        }
    } else {
        let query_lower = user_query.to_lowercase();
        for (name, route) in routes {
            if name == "default" {
                continue;
            }
            let keywords = route.get("keywords").and_then(|k| k.as_array());
            let matched = keywords.is_some_and(|keywords| {
                keywords
                    .iter()
                    .filter_map(|k| k.as_str())
                    .any(|k| query_lower.contains(&k.to_lowercase()))
            });
            if matched {
                category = name.clone();
                break;
            }
        }
    }

    let selected = routes
        .get(&category)
        .or_else(|| routes.get("default"))
        .ok_or_else(|| anyhow::anyhow!("Dispatcher: no route found for category '{}'", category))?;
    let workflow_id = selected
        .get("workflow_id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| anyhow::anyhow!("Dispatcher: route '{}' has no workflow_id", category))?;

    tracing::info!("📦 Routed query to category '{}' -> workflow '{}'", category, workflow_id);

    let mut sub_input = match ctx.input {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    sub_input.insert("dispatcher_info".to_string(), json!({ "category": category }));

    launch_workflow_by_id(ctx.engine, workflow_id, Value::Object(sub_input)).await
}

// --- Orchestrator mode ---

async fn execute_orchestrator(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let returning = ctx
        .input
        .get("return_to_dispatcher")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if returning {
        handle_workflow_return(ctx.engine, &node.id, ctx.input).await
    } else {
        create_new_session(node, ctx).await
    }
}

/// Create a session with an LLM-generated plan and launch its first step
async fn create_new_session(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let config = &node.config;
    let query_template = node
        .config_str("userQueryTemplate")
        .filter(|t| !t.is_empty())
        .unwrap_or("{{ input.query }}");
    let user_query = ctx.resolve(query_template).trim().to_string();
    if user_query.is_empty() {
        anyhow::bail!("Orchestrator: user query not found in input data");
    }

    let plan = create_execution_plan(ctx.engine, config, &user_query).await?;
    if plan.is_empty() {
        anyhow::bail!("Orchestrator: the model returned an empty execution plan");
    }

    let session = DispatcherSession {
        session_id: Uuid::new_v4().to_string(),
        dispatcher_id: node.id.clone(),
        plan: plan.clone(),
        current_step: 0,
        initial_query: user_query.clone(),
        execution_history: Vec::new(),
        is_agent_mode: node.config_bool("is_agent_mode", false),
        dispatcher_config: config.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let first_workflow_id = plan[0].workflow_id.clone();
    let workflow_input = json!({
        "initial_query": user_query,
        "last_step_result": {},
        "execution_history": [],
        "dispatcher_context": {
            "session_id": session.session_id,
            "plan": plan,
            "step": 0,
            "dispatcher_id": node.id,
        },
    });

    tracing::info!(
        "🧭 Created session {} with a {}-step plan",
        session.session_id,
        session.plan.len()
    );
    ctx.engine.sessions().insert(session).await;

    launch_workflow_by_id(ctx.engine, &first_workflow_id, workflow_input).await
}

/// Ask the LLM for a plan and validate it against the offered toolset
async fn create_execution_plan(
    engine: &WorkflowEngine,
    config: &Value,
    user_query: &str,
) -> Result<Vec<PlanStep>> {
    let available = config
        .get("availableWorkflows")
        .and_then(|w| w.as_object())
        .filter(|w| !w.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Orchestrator: available workflows are not configured"))?;
    let auth_token = config
        .get("dispatcherAuthToken")
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("Orchestrator: auth token is not configured"))?;

    let workflows_description = available
        .iter()
        .map(|(id, wf)| {
            let description = wf
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("No description");
            format!("- {}: {}", id, description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let planning_prompt = format!(
        "The user asks: \"{}\"\n\
         Available workflows:\n{}\n\
         Create a step-by-step execution plan as a JSON array of the form \
         [{{\"workflow_id\": \"id\", \"description\": \"desc\"}}].\n\
         Answer ONLY with the JSON array, no extra text.",
        user_query, workflows_description
    );

    let chat = engine.chat();
    if !chat.get_token(auth_token).await? {
        anyhow::bail!("Orchestrator: failed to authorize against the LLM API for planning");
    }
    let completion = chat
        .chat_completion(
            "You are a task planner. Build plans out of the available workflows.",
            &planning_prompt,
        )
        .await?;
    if !completion.success {
        anyhow::bail!(
            "Orchestrator: planning call failed: {}",
            completion.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let cleaned = template::strip_code_fences(completion.text());
    let plan: Vec<PlanStep> = serde_json::from_str(cleaned).map_err(|e| {
        tracing::error!("Plan parse error: {} in response: {}", e, completion.text());
        anyhow::anyhow!("Orchestrator: failed to create a valid execution plan")
    })?;

    for step in &plan {
        if !available.contains_key(&step.workflow_id) {
            anyhow::bail!(
                "Orchestrator: plan references unknown workflow '{}'",
                step.workflow_id
            );
        }
    }

    Ok(plan)
}

/// Handle a sub-workflow returning to its session
///
/// The session is removed from the store while it is being advanced and
/// re-inserted only when the plan continues, which both serializes callbacks
/// per session and guarantees deletion on completion.
pub async fn handle_workflow_return(
    engine: &WorkflowEngine,
    dispatcher_id: &str,
    input: &Value,
) -> Result<Value> {
    let session_id = input
        .get("session_id")
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("Dispatcher callback is missing session_id"))?;

    let mut session = engine
        .sessions()
        .take(dispatcher_id, session_id)
        .await
        .ok_or_else(|| {
            anyhow::anyhow!("Session {} not found in dispatcher {}", session_id, dispatcher_id)
        })?;

    if session.current_step < session.plan.len() {
        let completed = &session.plan[session.current_step];
        let step_result = input.get("workflow_result").cloned().unwrap_or(json!({}));
        session.execution_history.push(json!({
            "step_info": completed,
            "result": step_result,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
    }

    if session.is_agent_mode {
        tracing::info!("🧠 Agent mode: re-planning session {}", session_id);
        re_plan(engine, &mut session).await?;
        session.current_step = 0;
    } else {
        session.current_step += 1;
    }

    if session.current_step >= session.plan.len() {
        tracing::info!("✅ Plan for session {} fully executed", session_id);
        return Ok(json!({
            "success": true,
            "message": "Plan executed successfully",
            "results": session.execution_history,
        }));
    }

    let next_step = session.plan[session.current_step].clone();
    tracing::info!("➡️ Advancing to step {}: {}", session.current_step, next_step.workflow_id);

    let last_step_result = session
        .execution_history
        .last()
        .and_then(|h| h.get("result"))
        .cloned()
        .unwrap_or(json!({}));

    let workflow_input = json!({
        "initial_query": session.initial_query,
        "execution_history": session.execution_history,
        "last_step_result": last_step_result,
        "dispatcher_context": {
            "session_id": session.session_id,
            "plan": session.plan,
            "step": session.current_step,
            "dispatcher_id": session.dispatcher_id,
        },
    });

    engine.sessions().insert(session).await;
    launch_workflow_by_id(engine, &next_step.workflow_id, workflow_input).await
}

/// Replace the session's remaining plan based on the work done so far
///
/// A parse failure of the model's answer yields an empty plan, which ends
/// the session gracefully instead of crashing mid-flight.
async fn re_plan(engine: &WorkflowEngine, session: &mut DispatcherSession) -> Result<()> {
    let config = &session.dispatcher_config;
    let auth_token = config
        .get("dispatcherAuthToken")
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("Auth token for dispatcher not found in session config"))?;

    let available = config
        .get("availableWorkflows")
        .and_then(|w| w.as_object())
        .cloned()
        .unwrap_or_default();
    if available.is_empty() {
        tracing::warn!("No available workflows in dispatcher config for re-planning, aborting");
        session.plan = Vec::new();
        return Ok(());
    }

    let mut history_str = String::new();
    for (i, record) in session.execution_history.iter().enumerate() {
        let step_info = record.get("step_info").cloned().unwrap_or(json!({}));
        let result = record.get("result").cloned().unwrap_or(json!({}));
        history_str.push_str(&format!(
            "Step {}: executed workflow `{}` ({}).\nResult: {}\n\n",
            i + 1,
            step_info.get("workflow_id").and_then(|w| w.as_str()).unwrap_or("?"),
            step_info.get("description").and_then(|d| d.as_str()).unwrap_or(""),
            serde_json::to_string(&result).unwrap_or_default(),
        ));
    }

    let workflows_description = available
        .iter()
        .map(|(id, wf)| {
            let description = wf
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("No description");
            format!("- {}: {}", id, description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let re_planning_prompt = format!(
        "=== Original task ===\n{}\n\n\
         === Work done so far ===\n{}\n\
         === Available workflows for the next step ===\n{}\n\n\
         Based on the original task and the execution history, decide what \
         should happen next. Produce the UPDATED AND COMPLETE plan of the \
         remaining steps as a JSON array of the form \
         [{{\"workflow_id\": \"id\", \"description\": \"desc\"}}].\n\
         - If the task is already solved, return an empty array [].\n\
         - Use only workflows from the available list.\n\
         Answer ONLY with the JSON array, no extra text.",
        session.initial_query,
        if history_str.is_empty() { "Nothing done yet." } else { &history_str },
        workflows_description,
    );

    let chat = engine.chat();
    if !chat.get_token(auth_token).await? {
        anyhow::bail!("Failed to obtain chat token for re-planning");
    }
    let completion = chat
        .chat_completion(
            "You are an advanced AI agent that analyzes completed work and plans the next steps.",
            &re_planning_prompt,
        )
        .await?;

    let cleaned = template::strip_code_fences(completion.text());
    match serde_json::from_str::<Vec<PlanStep>>(cleaned) {
        Ok(new_plan) => {
            tracing::info!("✅ Agent received a new plan with {} steps", new_plan.len());
            session.plan = new_plan;
        }
        Err(e) => {
            tracing::error!("Error parsing new plan from the model: {} ({})", completion.text(), e);
            session.plan = Vec::new();
        }
    }

    Ok(())
}

/// Entry point for callbacks arriving over HTTP
///
/// The callback carries only the session id, so every dispatcher's sessions
/// are scanned to find the owner.
pub async fn process_callback(
    engine: &WorkflowEngine,
    session_id: &str,
    step_result: Value,
) -> Result<Value> {
    tracing::info!("🧠 Dispatcher received callback for session {}", session_id);

    let dispatcher_id = engine
        .sessions()
        .find_dispatcher(session_id)
        .await
        .ok_or_else(|| {
            anyhow::anyhow!("Session {} not found in any dispatcher sessions", session_id)
        })?;

    let callback_input = json!({
        "session_id": session_id,
        "return_to_dispatcher": true,
        "workflow_result": step_result,
    });

    handle_workflow_return(engine, &dispatcher_id, &callback_input).await
}
