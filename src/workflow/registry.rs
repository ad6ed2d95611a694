/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory set of compiled
/// workflows. Readers keep the `Arc` they loaded, so a reload never mutates
/// a graph another worker is reading.

use crate::error::{EngineError, Result};
use crate::workflow::{graph::WorkflowGraph, storage::WorkflowStorage, types::Workflow};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Lock-free workflow registry for hot-reload capabilities
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: compiled workflow definition
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

/// Workflow definition together with its validated graph
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    pub graph: WorkflowGraph,
}

impl CompiledWorkflow {
    pub fn compile(workflow: Workflow) -> Result<Self> {
        let graph = WorkflowGraph::build(&workflow)?;
        Ok(Self { workflow, graph })
    }
}

impl WorkflowRegistry {
    /// Create new registry instance with storage backend
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    /// Initialize registry by loading all workflows from storage
    ///
    /// Invalid workflows are logged and left out rather than failing startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;
        let mut compiled = HashMap::new();

        for (id, workflow) in stored_workflows {
            match CompiledWorkflow::compile(workflow) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                Err(e) => tracing::warn!("⚠️ Skipping invalid workflow {}: {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Persist a workflow and hot-swap it into the registry
    pub async fn save_and_reload(&self, workflow: Workflow) -> Result<()> {
        // Compile first so an invalid graph never reaches storage
        CompiledWorkflow::compile(workflow.clone())?;
        self.storage.save_workflow(&workflow).await?;
        self.reload_workflow(&workflow.id).await
    }

    /// Hot-reload a single workflow from storage
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        self.register_workflow(workflow)?;
        tracing::info!("Hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Compile and swap a workflow into the registry without touching storage
    pub fn register_workflow(&self, workflow: Workflow) -> Result<()> {
        let id = workflow.id.clone();
        let compiled = Arc::new(CompiledWorkflow::compile(workflow)?);

        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(id.clone(), Arc::clone(&compiled));
            next
        });

        Ok(())
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Like [`get_workflow`](Self::get_workflow) but absent is an error
    pub fn require_workflow(&self, workflow_id: &str) -> Result<Arc<CompiledWorkflow>> {
        self.get_workflow(workflow_id)
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))
    }

    /// List all active workflow IDs
    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Remove a workflow from registry
    pub fn remove_workflow(&self, workflow_id: &str) {
        let removed = self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(workflow_id);
            next
        });

        if removed.contains_key(workflow_id) {
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
    }
}
