//! In-flight execution tracking
//!
//! The tracker holds every execution that has been admitted but has not yet
//! reached a terminal state. Admission checks the per-workflow ceiling and
//! inserts under a single write guard, so concurrent dispatches cannot both
//! slip past the ceiling.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{TrackerError, TrackerResult};
use crate::execution::{Execution, ExecutionResult};

/// Map of in-flight executions keyed by execution id
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executions: RwLock<HashMap<String, Execution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an execution if its workflow is below `ceiling`
    pub async fn try_admit(&self, execution: Execution, ceiling: usize) -> TrackerResult<()> {
        let mut guard = self.executions.write().await;

        if guard.contains_key(&execution.id) {
            return Err(TrackerError::Duplicate(execution.id));
        }

        let in_flight = count_for(&guard, &execution.workflow_id);
        if in_flight >= ceiling {
            return Err(TrackerError::CeilingReached {
                workflow_id: execution.workflow_id,
                in_flight,
                ceiling,
            });
        }

        trace!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            in_flight = in_flight + 1,
            ceiling,
            "Admitted execution"
        );
        guard.insert(execution.id.clone(), execution);
        Ok(())
    }

    /// Insert an execution without a ceiling check
    pub async fn register(&self, execution: Execution) -> TrackerResult<()> {
        let mut guard = self.executions.write().await;
        if guard.contains_key(&execution.id) {
            return Err(TrackerError::Duplicate(execution.id));
        }
        guard.insert(execution.id.clone(), execution);
        Ok(())
    }

    /// Move a tracked execution to `running` and return a snapshot
    pub async fn mark_running(&self, execution_id: &str) -> TrackerResult<Execution> {
        let mut guard = self.executions.write().await;
        let execution = guard
            .get_mut(execution_id)
            .ok_or_else(|| TrackerError::NotFound(execution_id.to_string()))?;
        execution.start(Utc::now());
        Ok(execution.clone())
    }

    /// Finish an execution, removing it from the in-flight set
    ///
    /// Returns the terminal snapshot, or `None` if the id is not tracked.
    pub async fn complete(&self, execution_id: &str, result: ExecutionResult) -> Option<Execution> {
        let mut execution = self.executions.write().await.remove(execution_id)?;
        execution.finish(result, Utc::now());
        debug!(
            execution_id,
            workflow_id = %execution.workflow_id,
            status = %execution.status,
            execution_time_ms = execution.execution_time_ms,
            "Execution finished"
        );
        Some(execution)
    }

    /// Pending plus running executions of a workflow
    pub async fn in_flight_count(&self, workflow_id: &str) -> usize {
        count_for(&*self.executions.read().await, workflow_id)
    }

    pub async fn get(&self, execution_id: &str) -> Option<Execution> {
        self.executions.read().await.get(execution_id).cloned()
    }

    /// Snapshot of every in-flight execution
    pub async fn active(&self) -> Vec<Execution> {
        self.executions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

fn count_for(executions: &HashMap<String, Execution>, workflow_id: &str) -> usize {
    executions
        .values()
        .filter(|e| e.workflow_id == workflow_id && e.status.is_in_flight())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ceiling_rejects_second_execution() {
        let tracker = ExecutionTracker::new();

        tracker.try_admit(Execution::new("wf", Value::Null), 1).await.unwrap();
        let err = tracker
            .try_admit(Execution::new("wf", Value::Null), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, TrackerError::CeilingReached { in_flight: 1, ceiling: 1, .. }));
        assert_eq!(tracker.in_flight_count("wf").await, 1);

        // Other workflows are unaffected
        tracker.try_admit(Execution::new("other", Value::Null), 1).await.unwrap();
        assert_eq!(tracker.len().await, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_and_removal() {
        let tracker = ExecutionTracker::new();
        let execution = Execution::new("wf", Value::Null);
        let id = execution.id.clone();

        tracker.register(execution).await.unwrap();
        let running = tracker.mark_running(&id).await.unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);

        let done = tracker
            .complete(&id, ExecutionResult::timed_out("no response"))
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Timeout);
        assert!(tracker.is_empty().await);
        assert!(tracker.get(&id).await.is_none());

        // A terminal execution is gone for good
        assert!(tracker.complete(&id, ExecutionResult::completed(Vec::new())).await.is_none());
        assert!(matches!(
            tracker.mark_running(&id).await,
            Err(TrackerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let tracker = ExecutionTracker::new();
        let execution = Execution::new("wf", Value::Null);
        tracker.register(execution.clone()).await.unwrap();
        assert!(matches!(
            tracker.register(execution).await,
            Err(TrackerError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_admission_respects_ceiling() {
        let tracker = Arc::new(ExecutionTracker::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .try_admit(Execution::new("wf", Value::Null), 3)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(tracker.in_flight_count("wf").await, 3);
    }
}
