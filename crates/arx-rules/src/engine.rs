//! Rule engine
//!
//! The [`RuleEngine`] owns the rule registry, named rule groups, the shared
//! [`HistoryBuffer`] and evaluation counters. It has no internal locking;
//! callers that share it across tasks wrap it in a lock.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

use crate::condition::{Condition, Operator};
use crate::definition::RuleDefinition;
use crate::history::{EventRecord, HistoryBuffer};
use crate::pattern::{DetectedPattern, PatternConfig, PatternDetector, PatternKind};
use crate::rule::{EvaluationResult, Rule, RuleError, RuleResult, RuleType};

fn default_history_capacity() -> usize {
    1000
}

fn default_lookback_minutes() -> u32 {
    30
}

/// Rule engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    /// Maximum records kept for pattern detection
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Window used when a caller does not pick one
    #[serde(default = "default_lookback_minutes")]
    pub default_lookback_minutes: u32,

    #[serde(default)]
    pub patterns: PatternConfig,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            default_lookback_minutes: default_lookback_minutes(),
            patterns: PatternConfig::default(),
        }
    }
}

/// Which rules a batch evaluation runs
#[derive(Debug, Clone, PartialEq)]
pub enum RuleFilter {
    /// Every enabled rule
    All,
    /// Explicit ids, in the given order; unknown ids are ignored
    Ids(Vec<String>),
    /// Every rule of the given types, enabled or not
    Types(Vec<RuleType>),
    /// Members of a named group
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_rules_evaluated: usize,
    pub rules_triggered: usize,
    pub rules_failed: usize,
    pub evaluated_at: DateTime<Utc>,
}

/// Outcome of evaluating a set of rules against one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    pub all_results: Vec<EvaluationResult>,
    /// Triggered results, highest priority first
    pub triggered: Vec<EvaluationResult>,
    pub summary: EvaluationSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RuleCounters {
    evaluations: u64,
    triggers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub total_evaluations: u64,
    pub triggered_rules: u64,
    /// Percentage, rounded to two decimals
    pub trigger_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePerformance {
    pub name: String,
    pub evaluations: u64,
    pub triggers: u64,
    /// Percentage, rounded to two decimals
    pub trigger_rate: f64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub disabled_rules: usize,
    pub rule_type_distribution: BTreeMap<String, usize>,
    pub evaluation_stats: EvaluationStats,
    /// Keyed by rule id
    pub rule_performance: BTreeMap<String, RulePerformance>,
    pub event_history_size: usize,
    pub history_capacity: usize,
    pub rule_groups: usize,
}

/// Outcome of a rule import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
}

/// Rule registry plus shared event history
#[derive(Debug)]
pub struct RuleEngine {
    config: RuleEngineConfig,
    rules: IndexMap<String, Rule>,
    groups: IndexMap<String, Vec<String>>,
    history: HistoryBuffer,
    detector: PatternDetector,
    total_evaluations: u64,
    triggered_rules: u64,
    performance: HashMap<String, RuleCounters>,
    /// Sequence for generated rule ids; never reused after removals
    next_rule_seq: u64,
}

impl RuleEngine {
    pub fn new(config: RuleEngineConfig) -> Self {
        Self {
            history: HistoryBuffer::new(config.history_capacity),
            detector: PatternDetector::new(config.patterns.clone()),
            config,
            rules: IndexMap::new(),
            groups: IndexMap::new(),
            total_evaluations: 0,
            triggered_rules: 0,
            performance: HashMap::new(),
            next_rule_seq: 0,
        }
    }

    pub fn config(&self) -> &RuleEngineConfig {
        &self.config
    }

    /// Register a rule, replacing any rule with the same id
    pub fn add_rule(&mut self, rule: Rule) -> RuleResult<()> {
        rule.validate()?;
        if !rule.logic_operator.is_supported() {
            warn!(
                rule_id = %rule.id,
                logic_operator = %rule.logic_operator,
                "Unsupported logic operator, rule will never trigger"
            );
        }
        info!(rule_id = %rule.id, name = %rule.name, "Added rule");
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Option<Rule> {
        let removed = self.rules.shift_remove(rule_id);
        if let Some(rule) = &removed {
            info!(rule_id = %rule_id, name = %rule.name, "Removed rule");
        }
        removed
    }

    /// Replace an existing rule and bump its `updated_at`
    pub fn update_rule(&mut self, mut rule: Rule) -> RuleResult<()> {
        if !self.rules.contains_key(&rule.id) {
            return Err(RuleError::NotFound(rule.id));
        }
        rule.validate()?;
        rule.updated_at = Utc::now();
        info!(rule_id = %rule.id, name = %rule.name, "Updated rule");
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.get(rule_id)
    }

    pub fn get_rule_mut(&mut self, rule_id: &str) -> Option<&mut Rule> {
        self.rules.get_mut(rule_id)
    }

    /// Rules sorted by descending priority
    pub fn list_rules(&self, rule_type: Option<RuleType>, enabled_only: bool) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self
            .rules
            .values()
            .filter(|r| rule_type.map_or(true, |t| r.rule_type == t))
            .filter(|r| !enabled_only || r.enabled)
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn create_rule_group(&mut self, name: impl Into<String>, rule_ids: Vec<String>) {
        let name = name.into();
        info!(group = %name, rules = rule_ids.len(), "Created rule group");
        self.groups.insert(name, rule_ids);
    }

    pub fn rule_group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// `{prefix}_{seq}` not held by any registered rule
    fn generate_rule_id(&mut self, prefix: &str) -> String {
        loop {
            let id = format!("{prefix}_{}", self.next_rule_seq);
            self.next_rule_seq += 1;
            if !self.rules.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a single-condition threshold rule
    pub fn create_threshold_rule(
        &mut self,
        name: impl Into<String>,
        field: &str,
        threshold: f64,
        operator: Operator,
        description: Option<&str>,
    ) -> RuleResult<&Rule> {
        let id = self.generate_rule_id(&format!("threshold_{field}"));
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Threshold rule for {field}"));

        let rule = Rule::new(id.clone(), name, RuleType::Threshold)
            .with_description(description)
            .with_condition(Condition::new(field, operator, Value::from(threshold)));
        self.add_rule(rule)?;
        Ok(&self.rules[&id])
    }

    /// Register a pattern rule over several conditions
    pub fn create_pattern_rule(
        &mut self,
        name: impl Into<String>,
        conditions: Vec<Condition>,
        pattern_threshold: u32,
        window_minutes: u32,
        description: Option<&str>,
    ) -> RuleResult<&Rule> {
        let id = self.generate_rule_id("pattern");
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Pattern rule with {} conditions", conditions.len()));

        let mut rule = Rule::new(id.clone(), name, RuleType::Pattern)
            .with_description(description)
            .with_conditions(conditions);
        rule.pattern_threshold = pattern_threshold;
        rule.pattern_window_minutes = window_minutes;
        self.add_rule(rule)?;
        Ok(&self.rules[&id])
    }

    /// Record an event and evaluate the selected rules against it
    pub fn evaluate_rules(&mut self, record: &Value, filter: &RuleFilter) -> BatchEvaluation {
        self.evaluate_rules_at(record, filter, Utc::now())
    }

    /// [`evaluate_rules`](Self::evaluate_rules) at an explicit instant
    pub fn evaluate_rules_at(
        &mut self,
        record: &Value,
        filter: &RuleFilter,
        now: DateTime<Utc>,
    ) -> BatchEvaluation {
        self.history.push(EventRecord::new(record.clone(), now));

        let selected = self.select(filter);
        let mut all_results = Vec::with_capacity(selected.len());
        let mut triggered = Vec::new();
        let mut failed = 0;

        for rule_id in &selected {
            let Some(rule) = self.rules.get_mut(rule_id) else {
                continue;
            };

            self.total_evaluations += 1;
            let counters = self.performance.entry(rule_id.clone()).or_default();
            counters.evaluations += 1;

            match rule.evaluate_at(record, now) {
                Ok(result) => {
                    if result.triggered {
                        self.triggered_rules += 1;
                        counters.triggers += 1;
                        info!(
                            rule_id = %rule.id,
                            name = %rule.name,
                            confidence = result.confidence,
                            "Rule triggered"
                        );
                        triggered.push(result.clone());
                    }
                    all_results.push(result);
                }
                Err(e) => {
                    error!(rule_id = %rule.id, name = %rule.name, error = %e, "Rule evaluation error");
                    failed += 1;
                    all_results.push(EvaluationResult::failed(rule, &e, now));
                }
            }
        }

        triggered.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            evaluated = all_results.len(),
            triggered = triggered.len(),
            failed,
            "Rule batch evaluated"
        );

        BatchEvaluation {
            summary: EvaluationSummary {
                total_rules_evaluated: all_results.len(),
                rules_triggered: triggered.len(),
                rules_failed: failed,
                evaluated_at: now,
            },
            all_results,
            triggered,
        }
    }

    /// Evaluate enabled threshold rules and return the triggered results
    ///
    /// The record is added to history even when no threshold rule exists.
    pub fn evaluate_thresholds(&mut self, record: &Value) -> Vec<EvaluationResult> {
        self.evaluate_thresholds_at(record, Utc::now())
    }

    pub fn evaluate_thresholds_at(
        &mut self,
        record: &Value,
        now: DateTime<Utc>,
    ) -> Vec<EvaluationResult> {
        let ids: Vec<String> = self
            .rules
            .values()
            .filter(|r| r.rule_type == RuleType::Threshold && r.enabled)
            .map(|r| r.id.clone())
            .collect();
        self.evaluate_rules_at(record, &RuleFilter::Ids(ids), now)
            .triggered
    }

    fn select(&self, filter: &RuleFilter) -> Vec<String> {
        match filter {
            RuleFilter::All => self
                .rules
                .values()
                .filter(|r| r.enabled)
                .map(|r| r.id.clone())
                .collect(),
            RuleFilter::Ids(ids) => ids
                .iter()
                .filter(|id| self.rules.contains_key(id.as_str()))
                .cloned()
                .collect(),
            RuleFilter::Types(types) => self
                .rules
                .values()
                .filter(|r| types.contains(&r.rule_type))
                .map(|r| r.id.clone())
                .collect(),
            RuleFilter::Group(name) => match self.groups.get(name) {
                Some(ids) => ids
                    .iter()
                    .filter(|id| self.rules.contains_key(id.as_str()))
                    .cloned()
                    .collect(),
                None => {
                    warn!(group = %name, "Rule group not found");
                    Vec::new()
                }
            },
        }
    }

    /// Run one detector over the trailing window
    pub fn detect_patterns(&self, kind: PatternKind, lookback_minutes: u32) -> Vec<DetectedPattern> {
        self.detect_patterns_at(kind, lookback_minutes, Utc::now())
    }

    pub fn detect_patterns_at(
        &self,
        kind: PatternKind,
        lookback_minutes: u32,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let window = self.window(lookback_minutes, now);
        self.detector.detect(kind, &window, now)
    }

    /// Run every detector over the trailing window
    pub fn detect_all_patterns(&self, lookback_minutes: u32) -> Vec<DetectedPattern> {
        self.detect_all_patterns_at(lookback_minutes, Utc::now())
    }

    pub fn detect_all_patterns_at(
        &self,
        lookback_minutes: u32,
        now: DateTime<Utc>,
    ) -> Vec<DetectedPattern> {
        let window = self.window(lookback_minutes, now);
        self.detector.detect_all(&window, now)
    }

    fn window(&self, lookback_minutes: u32, now: DateTime<Utc>) -> Vec<EventRecord> {
        self.history
            .since(now - Duration::minutes(i64::from(lookback_minutes)))
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        info!("Rule engine event history cleared");
    }

    pub fn statistics(&self) -> EngineStatistics {
        let total_rules = self.rules.len();
        let enabled_rules = self.rules.values().filter(|r| r.enabled).count();

        let mut rule_type_distribution = BTreeMap::new();
        for rule in self.rules.values() {
            *rule_type_distribution
                .entry(rule.rule_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let rule_performance = self
            .performance
            .iter()
            .filter_map(|(id, counters)| {
                let rule = self.rules.get(id)?;
                Some((
                    id.clone(),
                    RulePerformance {
                        name: rule.name.clone(),
                        evaluations: counters.evaluations,
                        triggers: counters.triggers,
                        trigger_rate: rate(counters.triggers, counters.evaluations),
                    },
                ))
            })
            .collect();

        EngineStatistics {
            total_rules,
            enabled_rules,
            disabled_rules: total_rules - enabled_rules,
            rule_type_distribution,
            evaluation_stats: EvaluationStats {
                total_evaluations: self.total_evaluations,
                triggered_rules: self.triggered_rules,
                trigger_rate: rate(self.triggered_rules, self.total_evaluations),
            },
            rule_performance,
            event_history_size: self.history.len(),
            history_capacity: self.history.capacity(),
            rule_groups: self.groups.len(),
        }
    }

    /// Serialize the registry in insertion order
    pub fn export_rules(&self) -> Vec<RuleDefinition> {
        self.rules.values().map(RuleDefinition::from).collect()
    }

    /// Import rule definitions; one bad definition never aborts the batch
    pub fn import_rules(&mut self, definitions: Vec<Value>, overwrite: bool) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for value in definitions {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            if !overwrite && self.rules.contains_key(&id) {
                debug!(rule_id = %id, "Skipping existing rule");
                summary.skipped_count += 1;
                continue;
            }

            let imported = serde_json::from_value::<RuleDefinition>(value)
                .map_err(RuleError::from)
                .and_then(Rule::try_from)
                .and_then(|rule| self.add_rule(rule));

            match imported {
                Ok(()) => summary.imported_count += 1,
                Err(e) => {
                    warn!(rule_id = %id, error = %e, "Failed to import rule");
                    summary.errors.push(format!("Failed to import rule {id}: {e}"));
                }
            }
        }

        summary.error_count = summary.errors.len();
        info!(
            imported = summary.imported_count,
            skipped = summary.skipped_count,
            errors = summary.error_count,
            "Rule import complete"
        );
        summary
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleEngineConfig::default())
    }
}

/// Percentage rounded to two decimals
fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}
