/// Runtime Execution Engine
///
/// This module provides durable, queue-driven workflow execution:
/// - Node executors and the type-keyed executor registry
/// - Template interpolation and the predicate evaluator they rely on
/// - Task-execution and dependency-check work queues
/// - The coordinator, the dependency scheduler and the run service
/// - A synchronous depth-first runner for immediate execution

// Path lookup and {{ }} templating
pub mod template;

// JSON-logic predicate evaluation
pub mod logic;

// Executor contract and registry
pub mod executor;

// Built-in node types
pub mod nodes;

// In-process work queues and job payloads
pub mod queue;

// Readiness propagation, completion and pruning
pub mod scheduler;

// Task execution
pub mod coordinator;

// Synchronous depth-first runner
pub mod engine;

// Run control surface
pub mod service;

pub use coordinator::TaskCoordinator;
pub use engine::ExecutionEngine;
pub use executor::{ExecutionLog, ExecutorRegistry, NodeExecutor, NodeOutcome};
pub use queue::{DependencyJob, JobHandler, JobOptions, JobQueue, LocalQueue, TaskJob};
pub use scheduler::DependencyScheduler;
pub use service::{RunDetails, RunService};
