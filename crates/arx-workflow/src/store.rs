//! Workflow storage seam

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{WorkflowError, WorkflowResult};
use crate::execution::Execution;
use crate::workflow::{Workflow, WorkflowStatus};

/// Source of workflow definitions and sink for execution statistics
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Workflows in the given status, highest priority first
    async fn find_by_status(&self, status: WorkflowStatus) -> WorkflowResult<Vec<Workflow>>;

    async fn get(&self, workflow_id: &str) -> WorkflowResult<Option<Workflow>>;

    /// Fold a finished execution into the workflow's statistics
    async fn record_execution(&self, workflow_id: &str, execution: &Execution)
        -> WorkflowResult<()>;
}

/// Workflow store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: DashMap<String, Workflow>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow
    pub fn insert(&self, workflow: Workflow) {
        info!(workflow_id = %workflow.id, name = %workflow.name, status = %workflow.status, "Stored workflow");
        self.workflows.insert(workflow.id.clone(), workflow);
    }

    pub fn remove(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.remove(workflow_id).map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn find_by_status(&self, status: WorkflowStatus) -> WorkflowResult<Vec<Workflow>> {
        let mut found: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get(&self, workflow_id: &str) -> WorkflowResult<Option<Workflow>> {
        Ok(self.workflows.get(workflow_id).map(|entry| entry.value().clone()))
    }

    async fn record_execution(
        &self,
        workflow_id: &str,
        execution: &Execution,
    ) -> WorkflowResult<()> {
        let mut workflow = self
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        workflow.record_execution(execution);
        debug!(
            workflow_id,
            execution_count = workflow.stats.execution_count,
            "Recorded execution"
        );
        Ok(())
    }
}
