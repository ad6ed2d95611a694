/// Workflow Management Layer
///
/// Graph definitions consumed by the execution engine:
/// - Type definitions (Workflow, Node, Edge)
/// - Compiled petgraph view with frozen dependency lists
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Validated graph with precomputed edge and dependency indexes
pub mod graph;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use graph::WorkflowGraph;
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use types::{Edge, Node, Workflow};
