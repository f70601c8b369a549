//! Workflow definitions and execution statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{WorkflowError, WorkflowResult};
use crate::execution::{Execution, ExecutionStatus};
use crate::trigger::{TriggerType, WorkflowTrigger};

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Disabled,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Disabled => "disabled",
            WorkflowStatus::Archived => "archived",
        }
    }

    /// Whether a manual execution may start
    pub fn allows_manual_execution(&self) -> bool {
        matches!(self, WorkflowStatus::Active | WorkflowStatus::Draft)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a workflow variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl VariableType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Object => value.is_object(),
            VariableType::Array => value.is_array(),
            VariableType::Any => true,
        }
    }
}

fn default_variable_type() -> VariableType {
    VariableType::Any
}

/// A named workflow variable with an optional default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub name: String,

    #[serde(rename = "type", default = "default_variable_type")]
    pub var_type: VariableType,

    #[serde(default, alias = "default_value")]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,
}

impl WorkflowVariable {
    pub fn new(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            default: None,
            description: String::new(),
            required: false,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Check a supplied value against the declared type
    pub fn validate_value(&self, value: Option<&Value>) -> WorkflowResult<()> {
        match value {
            None | Some(Value::Null) if self.required => Err(WorkflowError::InvalidVariable {
                name: self.name.clone(),
                reason: "value is required".to_string(),
            }),
            None | Some(Value::Null) => Ok(()),
            Some(v) if !self.var_type.accepts(v) => Err(WorkflowError::InvalidVariable {
                name: self.name.clone(),
                reason: format!("expected {:?}, got {}", self.var_type, v),
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Running totals of finished executions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub average_execution_time_ms: f64,
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_priority() -> u8 {
    5
}

/// A workflow: triggers plus the limits that govern its executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: WorkflowStatus,

    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,

    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,

    /// Ceiling on pending plus running executions; the dispatcher default
    /// applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_executions: Option<usize>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub stats: WorkflowStats,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: WorkflowStatus::Draft,
            triggers: Vec::new(),
            variables: Vec::new(),
            max_concurrent_executions: None,
            timeout_seconds: default_timeout_seconds(),
            priority: default_priority(),
            stats: WorkflowStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_trigger(mut self, trigger: WorkflowTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_variable(mut self, variable: WorkflowVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = Some(max);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    /// Effective concurrency ceiling
    pub fn ceiling(&self, default: usize) -> usize {
        self.max_concurrent_executions.unwrap_or(default)
    }

    /// Problems that prevent activation
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Workflow name cannot be empty".to_string());
        }
        if self.triggers.is_empty() {
            errors.push("Workflow must have at least one trigger".to_string());
        }
        for trigger in &self.triggers {
            if trigger.trigger_type == TriggerType::Schedule
                && !trigger.configuration.contains_key("schedule")
            {
                errors.push(format!(
                    "Schedule trigger '{}' requires schedule configuration",
                    trigger.name
                ));
            }
            for condition in &trigger.conditions {
                if let Err(e) = condition.validate() {
                    errors.push(format!("Trigger '{}': {}", trigger.name, e));
                }
            }
        }
        for variable in &self.variables {
            if variable.name.is_empty() {
                errors.push("Variable name cannot be empty".to_string());
            }
        }

        errors
    }

    pub fn activate(&mut self) -> WorkflowResult<()> {
        if self.status == WorkflowStatus::Active {
            return Ok(());
        }
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(WorkflowError::InvalidConfig(format!(
                "cannot activate workflow: {}",
                errors.join(", ")
            )));
        }
        self.set_status(WorkflowStatus::Active);
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.set_status(WorkflowStatus::Paused);
    }

    pub fn disable(&mut self) {
        self.set_status(WorkflowStatus::Disabled);
    }

    fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Triggers fired by an event; empty unless the workflow is active
    pub fn should_trigger(&self, event_type: &str, event_data: &Value) -> Vec<&WorkflowTrigger> {
        if self.status != WorkflowStatus::Active {
            return Vec::new();
        }
        self.triggers
            .iter()
            .filter(|t| t.should_trigger(event_type, event_data))
            .collect()
    }

    /// Build a pending execution
    ///
    /// Variables start from declared defaults and are overridden by the
    /// `variables` object of the trigger data, if present.
    pub fn create_execution(&self, trigger_data: Value) -> WorkflowResult<Execution> {
        let supplied = trigger_data
            .get("variables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut execution = Execution::new(self.id.clone(), trigger_data);

        for variable in &self.variables {
            let value = supplied.get(&variable.name).or(variable.default.as_ref());
            variable.validate_value(value)?;
            if let Some(value) = value {
                execution.set_variable(variable.name.clone(), value.clone());
            }
        }
        for (name, value) in supplied {
            if !execution.variables.contains_key(&name) {
                execution.set_variable(name, value);
            }
        }

        let mut context = Map::new();
        context.insert("workflow_id".to_string(), Value::from(self.id.clone()));
        context.insert("workflow_name".to_string(), Value::from(self.name.clone()));
        context.insert("execution_id".to_string(), Value::from(execution.id.clone()));
        execution.context = context;

        debug!(workflow_id = %self.id, execution_id = %execution.id, "Created execution");
        Ok(execution)
    }

    /// Fold a finished execution into the statistics
    pub fn record_execution(&mut self, execution: &Execution) {
        let stats = &mut self.stats;
        stats.execution_count += 1;
        stats.last_executed_at = Some(execution.completed_at.unwrap_or_else(Utc::now));

        match execution.status {
            ExecutionStatus::Completed => stats.success_count += 1,
            ExecutionStatus::Failed => stats.failure_count += 1,
            ExecutionStatus::Timeout => stats.timeout_count += 1,
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }

        // Sub-millisecond runs count as 0 ms samples
        let n = stats.execution_count as f64;
        stats.average_execution_time_ms = (stats.average_execution_time_ms * (n - 1.0)
            + execution.execution_time_ms as f64)
            / n;

        self.updated_at = Utc::now();
    }

    /// Percentage of executions that completed
    pub fn success_rate(&self) -> f64 {
        percentage(self.stats.success_count, self.stats.execution_count)
    }

    /// Percentage of executions that failed or timed out
    pub fn failure_rate(&self) -> f64 {
        percentage(
            self.stats.failure_count + self.stats.timeout_count,
            self.stats.execution_count,
        )
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionResult;
    use arx_rules::{Condition, Operator};
    use serde_json::json;

    fn pump_workflow() -> Workflow {
        Workflow::new("wf-pump", "Restart pump")
            .with_trigger(
                WorkflowTrigger::new(TriggerType::DeviceEvent, "Pump fault").with_condition(
                    Condition::new("fault", Operator::Exists, Value::Null),
                ),
            )
            .with_variable(WorkflowVariable::new("retries", VariableType::Number).with_default(json!(3)))
    }

    #[test]
    fn test_should_trigger_requires_active() {
        let mut workflow = pump_workflow();
        let data = json!({"fault": "overcurrent"});
        assert!(workflow.should_trigger("device_event", &data).is_empty());

        workflow.activate().unwrap();
        assert_eq!(workflow.should_trigger("device_event", &data).len(), 1);
        assert!(workflow.should_trigger("device_event", &json!({})).is_empty());

        workflow.deactivate();
        assert_eq!(workflow.status, WorkflowStatus::Paused);
        assert!(workflow.should_trigger("device_event", &data).is_empty());
    }

    #[test]
    fn test_activate_requires_trigger() {
        let mut workflow = Workflow::new("wf-empty", "Empty");
        assert!(matches!(workflow.activate(), Err(WorkflowError::InvalidConfig(_))));

        let mut scheduled = Workflow::new("wf-nightly", "Nightly")
            .with_trigger(WorkflowTrigger::new(TriggerType::Schedule, "2am"));
        assert!(scheduled.activate().is_err());
    }

    #[test]
    fn test_create_execution_variables() {
        let workflow = pump_workflow();
        let execution = workflow
            .create_execution(json!({"variables": {"operator": "night-shift"}}))
            .unwrap();

        assert_eq!(execution.workflow_id, "wf-pump");
        assert_eq!(execution.variable("retries"), Some(&json!(3)));
        assert_eq!(execution.variable("operator"), Some(&json!("night-shift")));
        assert_eq!(execution.context["execution_id"], execution.id.as_str());

        let overridden = workflow
            .create_execution(json!({"variables": {"retries": 5}}))
            .unwrap();
        assert_eq!(overridden.variable("retries"), Some(&json!(5)));
    }

    #[test]
    fn test_create_execution_rejects_bad_variable() {
        let workflow = pump_workflow()
            .with_variable(WorkflowVariable {
                required: true,
                ..WorkflowVariable::new("zone", VariableType::String)
            });

        assert!(matches!(
            workflow.create_execution(json!({})),
            Err(WorkflowError::InvalidVariable { ref name, .. }) if name == "zone"
        ));
        assert!(workflow
            .create_execution(json!({"variables": {"zone": "north", "retries": "many"}}))
            .is_err());
    }

    #[test]
    fn test_record_execution_statistics() {
        let mut workflow = pump_workflow();
        let now = Utc::now();

        let mut ok = workflow.create_execution(json!({})).unwrap();
        ok.start(now);
        ok.finish(ExecutionResult::completed(Vec::new()), now + chrono::Duration::milliseconds(100));
        workflow.record_execution(&ok);

        let mut slow = workflow.create_execution(json!({})).unwrap();
        slow.start(now);
        slow.finish(ExecutionResult::timed_out("stuck"), now + chrono::Duration::milliseconds(300));
        workflow.record_execution(&slow);

        assert_eq!(workflow.stats.execution_count, 2);
        assert_eq!(workflow.stats.timeout_count, 1);
        assert_eq!(workflow.stats.average_execution_time_ms, 200.0);
        assert_eq!(workflow.success_rate(), 50.0);
        assert_eq!(workflow.failure_rate(), 50.0);
    }

    #[test]
    fn test_instant_runs_lower_average() {
        let mut workflow = pump_workflow();
        let now = Utc::now();

        let mut instant = workflow.create_execution(json!({})).unwrap();
        instant.start(now);
        instant.finish(ExecutionResult::completed(Vec::new()), now);
        workflow.record_execution(&instant);
        assert_eq!(workflow.stats.average_execution_time_ms, 0.0);

        let mut timed = workflow.create_execution(json!({})).unwrap();
        timed.start(now);
        timed.finish(ExecutionResult::completed(Vec::new()), now + chrono::Duration::milliseconds(100));
        workflow.record_execution(&timed);

        assert_eq!(workflow.stats.execution_count, 2);
        assert_eq!(workflow.stats.average_execution_time_ms, 50.0);
    }

    #[test]
    fn test_deserialize_defaults() {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "Cool down",
            "status": "active",
            "triggers": [{"type": "threshold_breach", "name": "Overheat"}]
        }))
        .unwrap();

        assert_eq!(workflow.ceiling(1), 1);
        assert_eq!(workflow.timeout_seconds, 3600);
        assert_eq!(workflow.priority, 5);
        assert_eq!(workflow.stats.execution_count, 0);
    }
}
