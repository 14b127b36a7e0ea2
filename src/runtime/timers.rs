/// Interval timer manager
///
/// Per-workflow timers launch a published workflow on a fixed interval as a
/// background job. Each timer is keyed `workflow_timer_<workflow_id>` and
/// carries a single-flight flag: a tick that fires while the previous run is
/// still executing is dropped, not queued. Removing the scheduled job is the
/// cancellation signal; a tick already running completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::runtime::engine::WorkflowEngine;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{
    ExecutionResult, Node, NodeType, Workflow, WorkflowExecuteRequest, WorkflowStatus,
};

const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Timer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Active,
    Paused,
    Error,
}

/// Tracked state of one timer
#[derive(Debug, Clone)]
struct TimerEntry {
    node_id: String,
    workflow_id: String,
    interval_minutes: u64,
    status: TimerStatus,
    next_execution: String,
    /// Single-flight flag shared with the scheduled job
    is_executing: Arc<AtomicBool>,
    job_id: Option<Uuid>,
}

/// Serializable timer view for the HTTP API (no task handles)
#[derive(Debug, Clone, Serialize)]
pub struct TimerInfo {
    pub id: String,
    pub node_id: String,
    pub workflow_id: String,
    pub interval_minutes: u64,
    pub status: TimerStatus,
    pub next_execution: String,
    pub is_executing: bool,
}

/// Background timer service over tokio-cron-scheduler
pub struct TimerManager {
    scheduler: RwLock<JobScheduler>,
    timers: Arc<RwLock<HashMap<String, TimerEntry>>>,
    storage: WorkflowStorage,
    engine: Arc<WorkflowEngine>,
}

impl TimerManager {
    pub async fn new(storage: WorkflowStorage, engine: Arc<WorkflowEngine>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            timers: Arc::new(RwLock::new(HashMap::new())),
            storage,
            engine,
        })
    }

    /// Start the underlying scheduler
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting timer manager");
        self.scheduler.read().await.start().await?;
        Ok(())
    }

    /// Create or update the timer for a workflow's timer node
    ///
    /// Gated on publication: a draft (or missing) workflow deactivates any
    /// existing timer instead of arming one.
    pub async fn setup_timer(&self, node: &Node, workflow_id: &str) -> Result<String> {
        let timer_id = timer_id_for(workflow_id);

        let Some(workflow) = self.storage.get(workflow_id).await? else {
            self.remove_timer(&timer_id).await;
            return Ok(format!("Workflow {} not found, timer setup cancelled.", workflow_id));
        };

        if workflow.status != WorkflowStatus::Published {
            if self.remove_timer(&timer_id).await {
                return Ok(format!(
                    "Timer for workflow {} has been deactivated because it is not published.",
                    workflow_id
                ));
            }
            return Ok(format!("Timer for draft workflow {} is not active.", workflow_id));
        }

        let interval = node.config_u64("interval", DEFAULT_INTERVAL_MINUTES);
        let existed = self.timers.read().await.contains_key(&timer_id);
        self.create_or_replace(&timer_id, &node.id, workflow_id, interval).await?;

        Ok(if existed {
            format!("Timer for published workflow {} updated.", workflow_id)
        } else {
            format!("Timer for published workflow {} created.", workflow_id)
        })
    }

    /// Arm timers for every timer node of a freshly published workflow
    pub async fn arm_workflow_timers(&self, workflow: &Workflow) -> Result<usize> {
        let mut armed = 0;
        for node in &workflow.nodes {
            if node.node_type == NodeType::Timer {
                let interval = node.config_u64("interval", DEFAULT_INTERVAL_MINUTES);
                self.create_or_replace(&timer_id_for(&workflow.id), &node.id, &workflow.id, interval)
                    .await?;
                armed += 1;
            }
        }
        Ok(armed)
    }

    /// Drop the timer of an unpublished or deleted workflow
    pub async fn deactivate_workflow_timers(&self, workflow_id: &str) {
        if self.remove_timer(&timer_id_for(workflow_id)).await {
            tracing::info!("🛑 Deactivated timer for workflow {}", workflow_id);
        }
    }

    /// List all timers (excluding task handles)
    pub async fn list(&self) -> Vec<TimerInfo> {
        self.timers
            .read()
            .await
            .iter()
            .map(|(id, entry)| TimerInfo {
                id: id.clone(),
                node_id: entry.node_id.clone(),
                workflow_id: entry.workflow_id.clone(),
                interval_minutes: entry.interval_minutes,
                status: entry.status,
                next_execution: entry.next_execution.clone(),
                is_executing: entry.is_executing.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Cancel the scheduled job, keeping the timer metadata
    pub async fn pause(&self, timer_id: &str) -> Result<()> {
        let job_id = {
            let mut timers = self.timers.write().await;
            let entry = timers
                .get_mut(timer_id)
                .ok_or_else(|| anyhow::anyhow!("Timer {} not found", timer_id))?;
            entry.status = TimerStatus::Paused;
            entry.job_id.take()
        };
        if let Some(job_id) = job_id {
            if let Err(e) = self.scheduler.read().await.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove job for {}: {}", timer_id, e);
            }
        }
        tracing::info!("⏸️ Timer {} paused", timer_id);
        Ok(())
    }

    /// Schedule a fresh job for a paused timer
    pub async fn resume(&self, timer_id: &str) -> Result<()> {
        let (node_id, workflow_id, interval) = {
            let timers = self.timers.read().await;
            let entry = timers
                .get(timer_id)
                .ok_or_else(|| anyhow::anyhow!("Timer {} not found", timer_id))?;
            (entry.node_id.clone(), entry.workflow_id.clone(), entry.interval_minutes)
        };
        self.create_or_replace(timer_id, &node_id, &workflow_id, interval).await?;
        tracing::info!("▶️ Timer {} resumed", timer_id);
        Ok(())
    }

    /// Cancel and remove a timer; true when one existed
    pub async fn delete(&self, timer_id: &str) -> bool {
        self.remove_timer(timer_id).await
    }

    /// Run the timer's workflow once, without altering the schedule
    pub async fn execute_now(&self, timer_id: &str) -> Result<ExecutionResult> {
        let (node_id, workflow_id) = {
            let timers = self.timers.read().await;
            let entry = timers
                .get(timer_id)
                .ok_or_else(|| anyhow::anyhow!("Timer {} not found", timer_id))?;
            (entry.node_id.clone(), entry.workflow_id.clone())
        };

        let workflow = self
            .storage
            .get(&workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow {} not found", workflow_id))?;

        let request = WorkflowExecuteRequest::from_workflow(&workflow, Some(node_id));
        Ok(self.engine.execute(request, json!({})).await)
    }

    async fn remove_timer(&self, timer_id: &str) -> bool {
        let Some(entry) = self.timers.write().await.remove(timer_id) else {
            return false;
        };
        if let Some(job_id) = entry.job_id {
            if let Err(e) = self.scheduler.read().await.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove job for {}: {}", timer_id, e);
            }
        }
        true
    }

    /// Replace any existing job and schedule a fresh interval task
    async fn create_or_replace(
        &self,
        timer_id: &str,
        node_id: &str,
        workflow_id: &str,
        interval_minutes: u64,
    ) -> Result<()> {
        // Drop the previous job first so two jobs never share a timer id.
        self.remove_timer(timer_id).await;

        let is_executing = Arc::new(AtomicBool::new(false));

        let storage = self.storage.clone();
        let engine = Arc::clone(&self.engine);
        let timers = Arc::clone(&self.timers);
        let flag = Arc::clone(&is_executing);
        let timer_id_owned = timer_id.to_string();
        let node_id_owned = node_id.to_string();
        let workflow_id_owned = workflow_id.to_string();

        let job = Job::new_repeated_async(
            Duration::from_secs(interval_minutes * 60),
            move |_uuid, _l| {
                let storage = storage.clone();
                let engine = Arc::clone(&engine);
                let timers = Arc::clone(&timers);
                let flag = Arc::clone(&flag);
                let timer_id = timer_id_owned.clone();
                let node_id = node_id_owned.clone();
                let workflow_id = workflow_id_owned.clone();

                Box::pin(async move {
                    // Single flight: drop overlapping ticks.
                    if flag.swap(true, Ordering::SeqCst) {
                        tracing::warn!(
                            "⏭️ Timer {} tick overlapped a running execution, dropping it",
                            timer_id
                        );
                        return;
                    }

                    {
                        let mut timers = timers.write().await;
                        if let Some(entry) = timers.get_mut(&timer_id) {
                            entry.next_execution = next_execution_at(interval_minutes);
                        }
                    }

                    // Always execute the most recent graph version.
                    match storage.get(&workflow_id).await {
                        Ok(Some(workflow)) if workflow.status == WorkflowStatus::Published => {
                            tracing::info!("🚀 Timer {} launching workflow '{}'", timer_id, workflow_id);
                            let request =
                                WorkflowExecuteRequest::from_workflow(&workflow, Some(node_id));
                            let result = engine.execute(request, json!({})).await;
                            if result.success {
                                tracing::info!("✅ Timer-triggered workflow '{}' completed", workflow_id);
                            } else {
                                tracing::error!(
                                    "❌ Timer-triggered workflow '{}' failed: {}",
                                    workflow_id,
                                    result.error.as_deref().unwrap_or("unknown error")
                                );
                            }
                        }
                        Ok(Some(_)) => {
                            tracing::warn!(
                                "⏭️ Workflow '{}' is no longer published, timer {} skipping tick",
                                workflow_id,
                                timer_id
                            );
                        }
                        Ok(None) => {
                            tracing::error!(
                                "❌ Workflow '{}' not found, timer {} cannot launch it",
                                workflow_id,
                                timer_id
                            );
                        }
                        Err(e) => {
                            tracing::error!("❌ Timer {} failed to read workflow: {}", timer_id, e);
                        }
                    }

                    flag.store(false, Ordering::SeqCst);
                })
            },
        )?;

        let job_id = self.scheduler.read().await.add(job).await?;

        self.timers.write().await.insert(
            timer_id.to_string(),
            TimerEntry {
                node_id: node_id.to_string(),
                workflow_id: workflow_id.to_string(),
                interval_minutes,
                status: TimerStatus::Active,
                next_execution: next_execution_at(interval_minutes),
                is_executing,
                job_id: Some(job_id),
            },
        );

        tracing::info!(
            "🕒 Timer {} scheduled every {} minute(s) for workflow '{}'",
            timer_id,
            interval_minutes,
            workflow_id
        );
        Ok(())
    }
}

fn timer_id_for(workflow_id: &str) -> String {
    format!("workflow_timer_{}", workflow_id)
}

fn next_execution_at(interval_minutes: u64) -> String {
    (chrono::Utc::now() + chrono::Duration::minutes(interval_minutes as i64)).to_rfc3339()
}
