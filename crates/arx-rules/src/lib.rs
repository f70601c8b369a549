//! Rule Engine
//!
//! This crate decides which automation rules fire for an incoming event
//! record, and computes statistical patterns over recent records.
//!
//! # Architecture
//!
//! ```text
//! RECORD → HISTORY → RULES (conditions → AND/OR gate + confidence)
//!                  ↘ PATTERNS (anomaly, trend, spike)
//! ```
//!
//! # Key Types
//!
//! - [`Condition`] - Weighted comparison against a record field
//! - [`Rule`] - Conditions combined by a logic operator, gated by cooldown
//! - [`HistoryBuffer`] - Bounded FIFO of recent records
//! - [`PatternDetector`] - Anomaly, trend and spike detection
//! - [`RuleEngine`] - Registry, history and statistics

pub mod condition;
pub mod definition;
pub mod engine;
pub mod history;
pub mod pattern;
pub mod rule;

pub use condition::{Condition, ConditionError, ConditionResult, Operator};
pub use definition::RuleDefinition;
pub use engine::{
    BatchEvaluation, EngineStatistics, EvaluationStats, EvaluationSummary, ImportSummary,
    RuleEngine, RuleEngineConfig, RuleFilter, RulePerformance,
};
pub use history::{EventRecord, HistoryBuffer};
pub use pattern::{
    Anomaly, DetectedPattern, PatternConfig, PatternDetector, PatternKind, Severity, Spike, Trend,
    TrendDirection,
};
pub use rule::{
    ConditionOutcome, EvaluationResult, LogicOperator, Rule, RuleError, RuleResult, RuleType,
    SkipReason,
};
