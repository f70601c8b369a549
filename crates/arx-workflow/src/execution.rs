//! Workflow executions and their lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution lifecycle state
///
/// `pending → running → {completed | failed | timeout}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one workflow action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Terminal outcome reported by a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    Timeout,
}

impl From<ExecutionOutcome> for ExecutionStatus {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed => ExecutionStatus::Completed,
            ExecutionOutcome::Failed => ExecutionStatus::Failed,
            ExecutionOutcome::Timeout => ExecutionStatus::Timeout,
        }
    }
}

/// What a runner hands back when an execution ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    #[serde(default)]
    pub action_results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn completed(action_results: Vec<ActionResult>) -> Self {
        Self {
            outcome: ExecutionOutcome::Completed,
            action_results,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Failed,
            action_results: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Timeout,
            action_results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// ULID, never reused
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,

    /// Event payload and trigger metadata that started the run
    pub triggered_by: Value,

    #[serde(default)]
    pub variables: Map<String, Value>,

    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(default)]
    pub action_results: Vec<ActionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>, triggered_by: Value) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            triggered_by,
            variables: Map::new(),
            context: Map::new(),
            action_results: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: 0,
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Move to `running`
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
    }

    /// Move to the terminal state reported by the runner
    pub fn finish(&mut self, result: ExecutionResult, now: DateTime<Utc>) {
        self.status = result.outcome.into();
        self.action_results = result.action_results;
        self.error = result.error;
        self.completed_at = Some(now);

        let started = self.started_at.unwrap_or(self.created_at);
        self.execution_time_ms = (now - started).num_milliseconds().max(0) as u64;
    }
}
