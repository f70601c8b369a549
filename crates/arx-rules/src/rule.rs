//! Rules: weighted condition sets gated by enable and cooldown state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::condition::{Condition, ConditionError};

/// Rule errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Invalid rule configuration: {0}")]
    InvalidConfig(String),

    #[error("Condition error in rule {rule_id}: {source}")]
    Condition {
        rule_id: String,
        #[source]
        source: ConditionError,
    },

    #[error("Invalid rule definition: {0}")]
    Definition(#[from] serde_json::Error),
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// Rule category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Threshold,
    Pattern,
    TimeBased,
    Correlation,
    Anomaly,
    Composite,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Threshold => "threshold",
            RuleType::Pattern => "pattern",
            RuleType::TimeBased => "time_based",
            RuleType::Correlation => "correlation",
            RuleType::Anomaly => "anomaly",
            RuleType::Composite => "composite",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How condition outcomes combine into a trigger decision
///
/// Parsing is case-insensitive. Values other than AND/OR are kept verbatim so
/// they survive export, but a rule carrying one never triggers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogicOperator {
    #[default]
    And,
    Or,
    Unsupported(String),
}

impl LogicOperator {
    pub fn is_supported(&self) -> bool {
        !matches!(self, LogicOperator::Unsupported(_))
    }

    /// Combine condition outcomes
    pub fn combine(&self, outcomes: &[bool]) -> bool {
        match self {
            LogicOperator::And => outcomes.iter().all(|r| *r),
            LogicOperator::Or => outcomes.iter().any(|r| *r),
            LogicOperator::Unsupported(_) => false,
        }
    }
}

impl From<String> for LogicOperator {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "AND" => LogicOperator::And,
            "OR" => LogicOperator::Or,
            _ => LogicOperator::Unsupported(value),
        }
    }
}

impl From<&str> for LogicOperator {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<LogicOperator> for String {
    fn from(value: LogicOperator) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicOperator::And => f.write_str("AND"),
            LogicOperator::Or => f.write_str("OR"),
            LogicOperator::Unsupported(raw) => f.write_str(raw),
        }
    }
}

/// Why a rule was not evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Cooldown,
    NoConditions,
}

/// Outcome of a single condition inside an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub condition: String,
    pub result: bool,
    pub weight: f64,
}

/// Result of evaluating one rule against one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub triggered: bool,
    pub confidence: f64,
    pub condition_results: Vec<ConditionOutcome>,
    pub logic_operator: LogicOperator,
    pub priority: u8,
    pub evaluated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,

    /// Trigger count after this evaluation, set only when triggered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationResult {
    fn empty(rule: &Rule, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            triggered: false,
            confidence: 0.0,
            condition_results: Vec::new(),
            logic_operator: rule.logic_operator.clone(),
            priority: rule.priority,
            evaluated_at: now,
            reason: None,
            trigger_count: None,
            error: None,
        }
    }

    fn skipped(rule: &Rule, reason: SkipReason, now: DateTime<Utc>) -> Self {
        Self {
            reason: Some(reason),
            ..Self::empty(rule, now)
        }
    }

    /// Non-triggered result carrying an evaluation error
    pub fn failed(rule: &Rule, error: &RuleError, now: DateTime<Utc>) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(rule, now)
        }
    }
}

pub(crate) fn default_priority() -> u8 {
    5
}

pub(crate) fn default_pattern_threshold() -> u32 {
    3
}

pub(crate) fn default_pattern_window_minutes() -> u32 {
    30
}

/// A named set of weighted conditions
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rule_type: RuleType,
    pub conditions: Vec<Condition>,
    pub logic_operator: LogicOperator,

    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub enabled: bool,

    pub time_window_minutes: Option<u32>,
    pub cooldown_minutes: Option<u32>,

    pub pattern_threshold: u32,
    pub pattern_window_minutes: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

impl Rule {
    /// Create an enabled rule with no conditions
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule_type: RuleType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            rule_type,
            conditions: Vec::new(),
            logic_operator: LogicOperator::default(),
            priority: default_priority(),
            enabled: true,
            time_window_minutes: None,
            cooldown_minutes: None,
            pattern_threshold: default_pattern_threshold(),
            pattern_window_minutes: default_pattern_window_minutes(),
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
            trigger_count: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn with_logic(mut self, logic: impl Into<LogicOperator>) -> Self {
        self.logic_operator = logic.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = Some(minutes);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate static configuration
    pub fn validate(&self) -> RuleResult<()> {
        if self.id.is_empty() {
            return Err(RuleError::InvalidConfig("rule id cannot be empty".to_string()));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(RuleError::InvalidConfig(format!(
                "priority must be between 1 and 10, got {}",
                self.priority
            )));
        }
        for condition in &self.conditions {
            condition.validate().map_err(|source| RuleError::Condition {
                rule_id: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Whether the rule is still cooling down at `now`
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown_minutes, self.last_triggered_at) {
            (Some(minutes), Some(last)) if minutes > 0 => {
                now < last + Duration::minutes(i64::from(minutes))
            }
            _ => false,
        }
    }

    /// Evaluate against a record at the current time
    pub fn evaluate(&mut self, record: &Value) -> RuleResult<EvaluationResult> {
        self.evaluate_at(record, Utc::now())
    }

    /// Evaluate against a record at the given instant
    pub fn evaluate_at(
        &mut self,
        record: &Value,
        now: DateTime<Utc>,
    ) -> RuleResult<EvaluationResult> {
        if !self.enabled {
            trace!(rule_id = %self.id, "Rule disabled");
            return Ok(EvaluationResult::skipped(self, SkipReason::Disabled, now));
        }

        if self.in_cooldown(now) {
            debug!(rule_id = %self.id, "Rule in cooldown period");
            return Ok(EvaluationResult::skipped(self, SkipReason::Cooldown, now));
        }

        if self.conditions.is_empty() {
            return Ok(EvaluationResult::skipped(self, SkipReason::NoConditions, now));
        }

        let mut outcomes = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let result = condition
                .check(record)
                .map_err(|source| RuleError::Condition {
                    rule_id: self.id.clone(),
                    source,
                })?;
            outcomes.push(ConditionOutcome {
                condition: condition.describe(),
                result,
                weight: condition.weight,
            });
        }

        let gates: Vec<bool> = outcomes.iter().map(|o| o.result).collect();
        let triggered = self.logic_operator.combine(&gates);
        let confidence = confidence(&outcomes);

        let mut result = EvaluationResult {
            triggered,
            confidence,
            condition_results: outcomes,
            ..EvaluationResult::empty(self, now)
        };

        if triggered {
            self.last_triggered_at = Some(now);
            self.trigger_count += 1;
            result.trigger_count = Some(self.trigger_count);
            debug!(
                rule_id = %self.id,
                confidence,
                trigger_count = self.trigger_count,
                "Rule conditions met"
            );
        }

        Ok(result)
    }
}

/// Weighted fraction of satisfied conditions
fn confidence(outcomes: &[ConditionOutcome]) -> f64 {
    let total: f64 = outcomes.iter().map(|o| o.weight).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let satisfied: f64 = outcomes.iter().filter(|o| o.result).map(|o| o.weight).sum();
    satisfied / total
}
