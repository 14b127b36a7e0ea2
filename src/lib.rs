/// aiflow: AI workflow orchestration engine
///
/// Users assemble directed graphs of heterogeneous nodes (LLM calls, HTTP
/// requests, conditionals, loops, joins, dispatchers, timers, webhooks)
/// through an external editor; this library persists those graphs and
/// executes them on demand, on schedule, or on external trigger.

// Core configuration and setup
pub mod config;

// Workflow management layer: definitions, storage and hot registry
pub mod workflow;

// Runtime execution engine: graph interpreter, node executors, timers
pub mod runtime;

// Template expansion for node configuration strings
pub mod template;

// LLM client layer (ChatClient trait + GigaChat implementation)
pub mod llm;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use runtime::{TimerManager, WorkflowEngine};
pub use server::start_server;
pub use workflow::{
    Connection, ExecutionResult, Node, NodeType, Workflow, WorkflowExecuteRequest, WorkflowStatus,
};
