/// Workflow management layer
///
/// Type definitions, SQLite persistence and the hot-reload registry.

// Core workflow type definitions
pub mod types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use registry::WorkflowRegistry;
pub use storage::{WorkflowStorage, WorkflowSummary};
pub use types::{
    Connection, ExecutionResult, LogEntry, Node, NodeType, Workflow, WorkflowExecuteRequest,
    WorkflowStatus,
};
