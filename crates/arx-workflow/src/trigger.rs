//! Workflow triggers
//!
//! A trigger declares which event type starts a workflow and, optionally,
//! conditions the event payload must satisfy. Conditions combine exactly as
//! they do inside a rule: AND requires all, OR requires any, and any other
//! logic operator never matches.

use arx_core::events;
use arx_rules::{Condition, LogicOperator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

/// Trigger type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    DeviceEvent,
    SensorReading,
    ThresholdBreach,
    StatusChange,
    SystemEvent,
    Schedule,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::DeviceEvent => events::DEVICE_EVENT,
            TriggerType::SensorReading => events::SENSOR_READING,
            TriggerType::ThresholdBreach => events::THRESHOLD_BREACH,
            TriggerType::StatusChange => events::STATUS_CHANGE,
            TriggerType::SystemEvent => events::SYSTEM_EVENT,
            TriggerType::Schedule => "schedule",
        }
    }

    /// Whether events of `event_type` can fire this trigger
    ///
    /// Schedule triggers are driven by a scheduler, never by bus events.
    pub fn matches_event(&self, event_type: &str) -> bool {
        match self {
            TriggerType::Schedule => false,
            other => other.as_str() == event_type,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

fn default_enabled() -> bool {
    true
}

/// A workflow-scoped trigger declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(default = "new_id")]
    pub id: String,

    #[serde(rename = "type")]
    pub trigger_type: TriggerType,

    pub name: String,

    /// Free-form settings (schedule expression, device filters, ...)
    #[serde(default)]
    pub configuration: Map<String, Value>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub logic_operator: LogicOperator,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WorkflowTrigger {
    pub fn new(trigger_type: TriggerType, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            trigger_type,
            name: name.into(),
            configuration: Map::new(),
            conditions: Vec::new(),
            logic_operator: LogicOperator::default(),
            enabled: true,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: impl Into<LogicOperator>) -> Self {
        self.logic_operator = logic.into();
        self
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Whether an event fires this trigger
    pub fn should_trigger(&self, event_type: &str, event_data: &Value) -> bool {
        if !self.enabled || !self.trigger_type.matches_event(event_type) {
            return false;
        }
        if self.conditions.is_empty() {
            return true;
        }

        let outcomes: Vec<bool> = self
            .conditions
            .iter()
            .map(|c| c.evaluate(event_data))
            .collect();
        let matched = self.logic_operator.combine(&outcomes);

        trace!(trigger_id = %self.id, event_type, matched, "Trigger conditions evaluated");
        matched
    }

    /// Event payload plus the metadata identifying this trigger
    pub fn trigger_data(&self, event_data: &Value) -> Value {
        let mut data = match event_data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        data.insert("trigger_id".to_string(), Value::from(self.id.clone()));
        data.insert(
            "trigger_type".to_string(),
            Value::from(self.trigger_type.as_str()),
        );
        data.insert("trigger_name".to_string(), Value::from(self.name.clone()));
        Value::Object(data)
    }
}
