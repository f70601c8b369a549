//! Execution runner seam
//!
//! What a workflow actually does is up to the runner. The dispatcher only
//! hands it the workflow and the running execution and records the outcome.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RunnerError;
use crate::execution::{Execution, ExecutionResult};
use crate::workflow::Workflow;

/// Performs the steps of a workflow execution
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn execute(
        &self,
        workflow: &Workflow,
        execution: &Execution,
    ) -> Result<ExecutionResult, RunnerError>;
}

/// Runner that only logs the execution and completes it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRunner;

#[async_trait]
impl ExecutionRunner for LoggingRunner {
    async fn execute(
        &self,
        workflow: &Workflow,
        execution: &Execution,
    ) -> Result<ExecutionResult, RunnerError> {
        info!(
            workflow_id = %workflow.id,
            workflow_name = %workflow.name,
            execution_id = %execution.id,
            trigger = %execution.triggered_by,
            "Executing workflow"
        );
        Ok(ExecutionResult::completed(Vec::new()))
    }
}

/// Wraps a runner and enforces each workflow's `timeout_seconds`
///
/// A timeout of zero disables the limit.
#[derive(Debug, Clone)]
pub struct TimeoutRunner<R> {
    inner: R,
}

impl<R> TimeoutRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: ExecutionRunner> ExecutionRunner for TimeoutRunner<R> {
    async fn execute(
        &self,
        workflow: &Workflow,
        execution: &Execution,
    ) -> Result<ExecutionResult, RunnerError> {
        if workflow.timeout_seconds == 0 {
            return self.inner.execute(workflow, execution).await;
        }

        let limit = Duration::from_secs(workflow.timeout_seconds);
        match tokio::time::timeout(limit, self.inner.execute(workflow, execution)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    workflow_id = %workflow.id,
                    execution_id = %execution.id,
                    timeout_seconds = workflow.timeout_seconds,
                    "Workflow execution timed out"
                );
                Err(RunnerError::Timeout {
                    seconds: workflow.timeout_seconds,
                })
            }
        }
    }
}
