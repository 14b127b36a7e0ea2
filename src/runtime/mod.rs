/// Runtime execution layer
///
/// The graph execution engine, the per-node executors and the background
/// timer service.

// Graph executor: BFS traversal, joins, GOTO cycles, sub-run recursion
pub mod engine;

// Individual node execution handlers
pub mod executors;

// Background interval timers launching published workflows
pub mod timers;

// Re-export main types
pub use engine::WorkflowEngine;
pub use timers::{TimerInfo, TimerManager, TimerStatus};
