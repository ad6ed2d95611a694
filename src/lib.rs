/// Runway: durable, queue-driven workflow execution engine
///
/// Workflows are directed graphs of typed nodes. Runs are persisted as one
/// task per node and advanced by two work queues, so every node executes at
/// most once and only after all of its upstream nodes have completed.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Workflow management layer - definitions, storage and hot-reload registry
pub mod workflow;

// Run, task and run-log persistence
pub mod store;

// Runtime execution engine - executors, queues, coordinator and scheduler
pub mod runtime;

// HTTP API layer - registration and run control endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, Result};
pub use runtime::{ExecutionLog, RunDetails, RunService};
pub use server::{start_server, Runtime};
pub use store::{Run, RunStatus, Task, TaskStatus};
pub use workflow::{Edge, Node, Workflow};
