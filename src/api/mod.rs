/// HTTP API layer
///
/// REST endpoints under /api/v1: workflow CRUD and publication, direct
/// execution, timer control, webhook registration/triggering and the
/// dispatcher callback.

// Workflow CRUD and publish/unpublish endpoints
pub mod workflows;

// Direct execution and node-status endpoints
pub mod execution;

// Timer setup and control endpoints
pub mod timers;

// Webhook registration and trigger endpoints
pub mod webhooks;

// Orchestrator dispatcher callback endpoint
pub mod dispatcher;

use std::sync::Arc;

use crate::runtime::{TimerManager, WorkflowEngine};
use crate::workflow::{WorkflowRegistry, WorkflowStorage};

/// Application state shared by all routes
#[derive(Clone)]
pub struct AppState {
    /// Workflow persistence
    pub storage: WorkflowStorage,
    /// Hot in-memory mirror for trigger lookups
    pub registry: Arc<WorkflowRegistry>,
    /// Workflow execution engine
    pub engine: Arc<WorkflowEngine>,
    /// Background timer service
    pub timers: Arc<TimerManager>,
    /// Externally visible base URL for handed-out webhook URLs
    pub public_base_url: String,
}
