//! Condition types and evaluation
//!
//! A condition is a single weighted comparison between a field of an event
//! record and a configured value. Evaluation is a pure function of the
//! condition and the record: missing fields and values that cannot be
//! coerced never raise, they simply fail to match.

use arx_core::path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{trace, warn};

/// Condition errors
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid condition configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    NotBetween,
    In,
    NotIn,
    Contains,
    NotContains,
    Regex,
    Exists,
    NotExists,
}

impl Operator {
    /// Wire name of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Between => "between",
            Operator::NotBetween => "not_between",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Regex => "regex",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_weight() -> f64 {
    1.0
}

/// A single weighted comparison against a field of an event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-addressed field path (`device.readings.0.value`)
    pub field: String,

    /// Comparison operator
    pub operator: Operator,

    /// Comparison value
    #[serde(default)]
    pub value: Value,

    /// Contribution to rule confidence
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(skip)]
    compiled: CompiledPattern,
}

/// Anchored regex compiled on first use, keyed by its source pattern
#[derive(Debug, Clone, Default)]
struct CompiledPattern(OnceLock<(String, Regex)>);

impl CompiledPattern {
    fn is_match(&self, pattern: &str, haystack: &str) -> ConditionResult<bool> {
        match self.0.get() {
            Some((source, re)) if source == pattern => Ok(re.is_match(haystack)),
            cached => {
                // `value` is public; a changed pattern is compiled without caching
                let re = compile_anchored(pattern)?;
                let matched = re.is_match(haystack);
                if cached.is_none() {
                    let _ = self.0.set((pattern.to_string(), re));
                }
                Ok(matched)
            }
        }
    }
}

// The cache is derived state and never affects equality
impl PartialEq for CompiledPattern {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Condition {
    /// Create a condition with the default weight of 1
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            weight: default_weight(),
            compiled: CompiledPattern::default(),
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Human-readable form used in evaluation results
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.field, self.operator, self.value)
    }

    /// Validate static configuration
    pub fn validate(&self) -> ConditionResult<()> {
        if self.field.is_empty() {
            return Err(ConditionError::InvalidConfig(
                "field path cannot be empty".to_string(),
            ));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(ConditionError::InvalidConfig(format!(
                "weight must be a non-negative number, got {}",
                self.weight
            )));
        }
        if self.operator == Operator::Regex {
            compile_anchored(&stringify(&self.value))?;
        }
        Ok(())
    }

    /// Evaluate the condition, failing closed on any error
    pub fn evaluate(&self, record: &Value) -> bool {
        match self.check(record) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(field = %self.field, error = %e, "Rule condition evaluation error");
                false
            }
        }
    }

    /// Evaluate the condition
    ///
    /// Coercion failures are a non-match; only configuration errors such as an
    /// invalid regex are returned as `Err`.
    pub fn check(&self, record: &Value) -> ConditionResult<bool> {
        let Some(actual) = path::lookup(record, &self.field) else {
            trace!(field = %self.field, operator = %self.operator, "Field absent");
            return Ok(self.operator == Operator::NotExists);
        };

        let matched = match self.operator {
            Operator::Exists => true,
            Operator::NotExists => false,
            Operator::Equals => values_equal(actual, &self.value),
            Operator::NotEquals => !values_equal(actual, &self.value),
            Operator::GreaterThan => self.compare_numeric(actual, |a, b| a > b),
            Operator::GreaterThanOrEqual => self.compare_numeric(actual, |a, b| a >= b),
            Operator::LessThan => self.compare_numeric(actual, |a, b| a < b),
            Operator::LessThanOrEqual => self.compare_numeric(actual, |a, b| a <= b),
            Operator::Between | Operator::NotBetween => {
                let negate = self.operator == Operator::NotBetween;
                match self.range() {
                    // A malformed range never matches `between`
                    None => negate,
                    Some((low, high)) => match self.coerce_field(actual) {
                        Some(v) => (low <= v && v <= high) != negate,
                        None => false,
                    },
                }
            }
            Operator::In | Operator::NotIn => match container_holds(&self.value, actual) {
                Some(found) => found != (self.operator == Operator::NotIn),
                None => {
                    warn!(
                        field = %self.field,
                        operator = %self.operator,
                        "Comparison value is not a container"
                    );
                    false
                }
            },
            Operator::Contains => stringify(actual).contains(stringify(&self.value).as_ref()),
            Operator::NotContains => !stringify(actual).contains(stringify(&self.value).as_ref()),
            Operator::Regex => self
                .compiled
                .is_match(&stringify(&self.value), &stringify(actual))?,
        };

        trace!(field = %self.field, operator = %self.operator, matched, "Condition result");
        Ok(matched)
    }

    fn compare_numeric(&self, actual: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
        let Some(lhs) = self.coerce_field(actual) else {
            return false;
        };
        match to_f64(&self.value) {
            Some(rhs) => cmp(lhs, rhs),
            None => {
                warn!(
                    field = %self.field,
                    value = %self.value,
                    "Comparison value is not numeric"
                );
                false
            }
        }
    }

    fn coerce_field(&self, actual: &Value) -> Option<f64> {
        let coerced = to_f64(actual);
        if coerced.is_none() {
            warn!(field = %self.field, actual = %actual, "Field value is not numeric");
        }
        coerced
    }

    fn range(&self) -> Option<(f64, f64)> {
        match self.value.as_array().map(Vec::as_slice) {
            Some([low, high]) => Some((to_f64(low)?, to_f64(high)?)),
            _ => None,
        }
    }
}

/// Compile a pattern anchored at the start of the input
fn compile_anchored(pattern: &str) -> ConditionResult<Regex> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| ConditionError::InvalidPattern {
        pattern: pattern.to_string(),
        source: e,
    })
}

/// Coerce a JSON value to a float
fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Equality that treats `5` and `5.0` as the same number
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Membership test; `None` when the container is not a container
fn container_holds(container: &Value, item: &Value) -> Option<bool> {
    match container {
        Value::Array(items) => Some(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Some(item.as_str().is_some_and(|k| map.contains_key(k))),
        Value::String(s) => item.as_str().map(|needle| s.contains(needle)),
        _ => None,
    }
}

/// String form of a value for substring and regex matching
fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: Operator, value: Value) -> Condition {
        Condition::new(field, operator, value)
    }

    #[test]
    fn test_condition_deserialize_default_weight() {
        let c: Condition = serde_json::from_value(json!({
            "field": "temperature",
            "operator": "greater_than",
            "value": 80
        }))
        .unwrap();

        assert_eq!(c.operator, Operator::GreaterThan);
        assert_eq!(c.weight, 1.0);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result: Result<Condition, _> = serde_json::from_value(json!({
            "field": "temperature",
            "operator": "approximately",
            "value": 80
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_equals_numeric_and_string() {
        let record = json!({"status": "online", "count": 5});
        assert!(cond("status", Operator::Equals, json!("online")).evaluate(&record));
        assert!(cond("count", Operator::Equals, json!(5.0)).evaluate(&record));
        assert!(cond("status", Operator::NotEquals, json!("offline")).evaluate(&record));
    }

    #[test]
    fn test_numeric_comparisons() {
        let record = json!({"sensor": {"temperature": 75}});
        assert!(cond("sensor.temperature", Operator::GreaterThan, json!(70)).evaluate(&record));
        assert!(cond("sensor.temperature", Operator::GreaterThanOrEqual, json!(75)).evaluate(&record));
        assert!(cond("sensor.temperature", Operator::LessThan, json!("80")).evaluate(&record));
        assert!(!cond("sensor.temperature", Operator::LessThanOrEqual, json!(74.9)).evaluate(&record));
    }

    #[test]
    fn test_numeric_coercion_fails_closed() {
        let record = json!({"temperature": "hot"});
        let c = cond("temperature", Operator::GreaterThan, json!(10));
        assert!(!c.evaluate(&record));
        assert!(c.check(&record).is_ok());

        let c = cond("temperature", Operator::LessThan, json!({"not": "a number"}));
        assert!(!c.evaluate(&json!({"temperature": 5})));
    }

    #[test]
    fn test_between() {
        let record = json!({"pressure": 30});
        assert!(cond("pressure", Operator::Between, json!([20, 40])).evaluate(&record));
        assert!(!cond("pressure", Operator::NotBetween, json!([20, 40])).evaluate(&record));
        assert!(cond("pressure", Operator::NotBetween, json!([31, 40])).evaluate(&record));

        // Malformed range
        assert!(!cond("pressure", Operator::Between, json!(30)).evaluate(&record));
        assert!(cond("pressure", Operator::NotBetween, json!([1, 2, 3])).evaluate(&record));
    }

    #[test]
    fn test_in_and_not_in() {
        let record = json!({"zone": "boiler_room", "code": 3});
        assert!(cond("zone", Operator::In, json!(["boiler_room", "roof"])).evaluate(&record));
        assert!(cond("code", Operator::In, json!([1.0, 3.0])).evaluate(&record));
        assert!(cond("zone", Operator::NotIn, json!(["lobby"])).evaluate(&record));
        assert!(cond("zone", Operator::In, json!({"boiler_room": true})).evaluate(&record));

        // Non-container comparison value fails closed both ways
        assert!(!cond("code", Operator::In, json!(3)).evaluate(&record));
        assert!(!cond("code", Operator::NotIn, json!(3)).evaluate(&record));
    }

    #[test]
    fn test_contains() {
        let record = json!({"message": "compressor fault detected", "code": 5012});
        assert!(cond("message", Operator::Contains, json!("fault")).evaluate(&record));
        assert!(cond("message", Operator::NotContains, json!("ok")).evaluate(&record));
        assert!(cond("code", Operator::Contains, json!(50)).evaluate(&record));
    }

    #[test]
    fn test_regex_anchors_at_start() {
        let record = json!({"device_id": "hvac-unit-42"});
        assert!(cond("device_id", Operator::Regex, json!("hvac-")).evaluate(&record));
        assert!(cond("device_id", Operator::Regex, json!(r"hvac-unit-\d+")).evaluate(&record));
        assert!(!cond("device_id", Operator::Regex, json!("unit")).evaluate(&record));
    }

    #[test]
    fn test_regex_reused_across_evaluations() {
        let mut c = cond("device_id", Operator::Regex, json!(r"hvac-\d+"));
        for (device, expected) in [("hvac-1", true), ("boiler-1", false), ("hvac-22", true)] {
            assert_eq!(c.check(&json!({"device_id": device})).unwrap(), expected);
        }

        let copy = c.clone();
        assert_eq!(copy, cond("device_id", Operator::Regex, json!(r"hvac-\d+")));
        assert!(copy.evaluate(&json!({"device_id": "hvac-7"})));

        c.value = json!("boiler-");
        assert!(c.evaluate(&json!({"device_id": "boiler-1"})));
        assert!(!c.evaluate(&json!({"device_id": "hvac-1"})));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let record = json!({"device_id": "hvac"});
        let c = cond("device_id", Operator::Regex, json!("(unclosed"));

        assert!(!c.evaluate(&record));
        assert!(matches!(
            c.check(&record),
            Err(ConditionError::InvalidPattern { .. })
        ));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_absent_field() {
        let record = json!({"present": 1, "nothing": null});
        assert!(!cond("missing", Operator::Exists, Value::Null).evaluate(&record));
        assert!(cond("missing", Operator::NotExists, Value::Null).evaluate(&record));
        assert!(cond("nothing", Operator::NotExists, Value::Null).evaluate(&record));
        assert!(cond("present", Operator::Exists, Value::Null).evaluate(&record));

        // Every other operator is false on an absent field
        assert!(!cond("missing", Operator::NotEquals, json!(1)).evaluate(&record));
        assert!(!cond("missing", Operator::NotIn, json!([1])).evaluate(&record));
        assert!(!cond("missing", Operator::NotContains, json!("x")).evaluate(&record));
        assert!(!cond("missing", Operator::NotBetween, json!([0, 1])).evaluate(&record));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let record = json!({"readings": [{"value": 12.5}]});
        let c = cond("readings.0.value", Operator::Between, json!([10, 15]));
        let first = c.evaluate(&record);
        for _ in 0..10 {
            assert_eq!(c.evaluate(&record), first);
        }
    }

    #[test]
    fn test_validate_weight() {
        let c = cond("x", Operator::Exists, Value::Null).with_weight(-1.0);
        assert!(matches!(c.validate(), Err(ConditionError::InvalidConfig(_))));
        assert!(cond("x", Operator::Exists, Value::Null).validate().is_ok());
    }

    #[test]
    fn test_describe() {
        let c = cond("temperature", Operator::GreaterThan, json!(80));
        assert_eq!(c.describe(), "temperature greater_than 80");
    }
}
