//! Serialized rule shape used for import and export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::rule::{
    default_pattern_threshold, default_pattern_window_minutes, default_priority, LogicOperator,
    Rule, RuleError, RuleType,
};

fn default_enabled() -> bool {
    true
}

/// Rule definition as exchanged with configuration files and other services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub rule_type: RuleType,

    #[serde(default)]
    pub logic_operator: LogicOperator,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub time_window_minutes: Option<u32>,

    #[serde(default)]
    pub cooldown_minutes: Option<u32>,

    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: u32,

    #[serde(default = "default_pattern_window_minutes")]
    pub pattern_window_minutes: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Rule> for RuleDefinition {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            rule_type: rule.rule_type,
            logic_operator: rule.logic_operator.clone(),
            priority: rule.priority,
            enabled: rule.enabled,
            conditions: rule.conditions.clone(),
            time_window_minutes: rule.time_window_minutes,
            cooldown_minutes: rule.cooldown_minutes,
            pattern_threshold: rule.pattern_threshold,
            pattern_window_minutes: rule.pattern_window_minutes,
            created_at: Some(rule.created_at),
            updated_at: Some(rule.updated_at),
        }
    }
}

impl TryFrom<RuleDefinition> for Rule {
    type Error = RuleError;

    fn try_from(def: RuleDefinition) -> Result<Self, Self::Error> {
        let mut rule = Rule::new(def.id, def.name, def.rule_type)
            .with_description(def.description)
            .with_conditions(def.conditions)
            .with_logic(def.logic_operator)
            .with_priority(def.priority);

        rule.enabled = def.enabled;
        rule.time_window_minutes = def.time_window_minutes;
        rule.cooldown_minutes = def.cooldown_minutes;
        rule.pattern_threshold = def.pattern_threshold;
        rule.pattern_window_minutes = def.pattern_window_minutes;
        if let Some(created_at) = def.created_at {
            rule.created_at = created_at;
        }
        if let Some(updated_at) = def.updated_at {
            rule.updated_at = updated_at;
        }

        rule.validate()?;
        Ok(rule)
    }
}
