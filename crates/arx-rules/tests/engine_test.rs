//! End-to-end behaviour of the rule engine: batch isolation, history
//! bounds, pattern detection over recorded events and registry round-trips.

use arx_rules::{
    Condition, DetectedPattern, Operator, PatternKind, Rule, RuleEngine, RuleEngineConfig,
    RuleFilter, RuleType, Severity, TrendDirection,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 6, 0, 0).unwrap()
}

fn engine_with_capacity(capacity: usize) -> RuleEngine {
    RuleEngine::new(RuleEngineConfig {
        history_capacity: capacity,
        ..Default::default()
    })
}

// ============================================================================
// Batch evaluation
// ============================================================================

#[test]
fn test_failing_rule_does_not_abort_batch() {
    let mut engine = engine_with_capacity(100);
    engine
        .add_rule(
            Rule::new("broken", "Broken regex", RuleType::Pattern).with_condition(
                Condition::new("device_id", Operator::Regex, json!("hvac")),
            ),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new("hot", "Hot", RuleType::Threshold)
                .with_priority(8)
                .with_condition(Condition::new("temperature", Operator::GreaterThan, json!(30))),
        )
        .unwrap();

    // Corrupt the pattern after registration so validation cannot catch it
    engine.get_rule_mut("broken").unwrap().conditions[0].value = json!("(unclosed");

    let batch = engine.evaluate_rules_at(
        &json!({"device_id": "hvac-1", "temperature": 35}),
        &RuleFilter::All,
        t0(),
    );

    assert_eq!(batch.summary.total_rules_evaluated, 2);
    assert_eq!(batch.summary.rules_failed, 1);
    assert_eq!(batch.summary.rules_triggered, 1);

    let broken = batch
        .all_results
        .iter()
        .find(|r| r.rule_id == "broken")
        .unwrap();
    assert!(!broken.triggered);
    assert!(broken.error.as_deref().unwrap().contains("Invalid regex"));
    assert_eq!(batch.triggered[0].rule_id, "hot");
}

#[test]
fn test_triggered_sorted_by_descending_priority() {
    let mut engine = engine_with_capacity(100);
    for (id, priority) in [("p3", 3), ("p9", 9), ("p6", 6)] {
        engine
            .add_rule(
                Rule::new(id, id, RuleType::Threshold)
                    .with_priority(priority)
                    .with_condition(Condition::new("alarm", Operator::Equals, json!(true))),
            )
            .unwrap();
    }

    let batch = engine.evaluate_rules_at(&json!({"alarm": true}), &RuleFilter::All, t0());
    let order: Vec<_> = batch.triggered.iter().map(|r| r.priority).collect();
    assert_eq!(order, vec![9, 6, 3]);
}

#[test]
fn test_type_filter_includes_disabled_rules() {
    let mut engine = engine_with_capacity(100);
    engine
        .add_rule(
            Rule::new("off", "off", RuleType::Anomaly)
                .disabled()
                .with_condition(Condition::new("x", Operator::Exists, Value::Null)),
        )
        .unwrap();

    let batch = engine.evaluate_rules_at(
        &json!({"x": 1}),
        &RuleFilter::Types(vec![RuleType::Anomaly]),
        t0(),
    );
    assert_eq!(batch.all_results.len(), 1);
    assert!(!batch.all_results[0].triggered);

    let all = engine.evaluate_rules_at(&json!({"x": 1}), &RuleFilter::All, t0());
    assert!(all.all_results.is_empty());
}

#[test]
fn test_evaluate_thresholds_respects_cooldown() {
    let mut engine = engine_with_capacity(100);
    engine
        .add_rule(
            Rule::new("pressure", "Overpressure", RuleType::Threshold)
                .with_cooldown_minutes(10)
                .with_condition(Condition::new("psi", Operator::GreaterThanOrEqual, json!(120))),
        )
        .unwrap();
    engine
        .add_rule(
            Rule::new("trend", "Not a threshold", RuleType::Pattern)
                .with_condition(Condition::new("psi", Operator::Exists, Value::Null)),
        )
        .unwrap();

    let reading = json!({"psi": 130});
    assert_eq!(engine.evaluate_thresholds_at(&reading, t0()).len(), 1);
    assert!(engine
        .evaluate_thresholds_at(&reading, t0() + Duration::minutes(5))
        .is_empty());
    let again = engine.evaluate_thresholds_at(&reading, t0() + Duration::minutes(11));
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].trigger_count, Some(2));
}

#[test]
fn test_generated_ids_survive_removal() {
    let mut engine = engine_with_capacity(100);
    let first = engine
        .create_threshold_rule("Warm", "temperature", 25.0, Operator::GreaterThan, None)
        .unwrap()
        .id
        .clone();
    let second = engine
        .create_threshold_rule("Hot", "temperature", 35.0, Operator::GreaterThan, None)
        .unwrap()
        .id
        .clone();

    assert!(engine.remove_rule(&first).is_some());
    let third = engine
        .create_threshold_rule("Scorching", "temperature", 45.0, Operator::GreaterThan, None)
        .unwrap()
        .id
        .clone();

    assert_ne!(third, second);
    assert_eq!(engine.rule_count(), 2);
    assert_eq!(engine.get_rule(&second).unwrap().name, "Hot");
    assert_eq!(engine.get_rule(&third).unwrap().name, "Scorching");

    // Ids taken by imported or hand-built rules are skipped too
    engine
        .add_rule(
            Rule::new("pattern_3", "Manual", RuleType::Pattern)
                .with_condition(Condition::new("status", Operator::Exists, Value::Null)),
        )
        .unwrap();
    let generated = engine
        .create_pattern_rule(
            "Flapping",
            vec![Condition::new("status", Operator::Equals, json!("offline"))],
            3,
            10,
            None,
        )
        .unwrap()
        .id
        .clone();
    assert_ne!(generated, "pattern_3");
    assert_eq!(engine.get_rule("pattern_3").unwrap().name, "Manual");
    assert_eq!(engine.rule_count(), 4);
}

// ============================================================================
// History and patterns
// ============================================================================

#[test]
fn test_history_evicts_oldest_beyond_capacity() {
    let mut engine = engine_with_capacity(5);
    for i in 0..6 {
        engine.evaluate_rules_at(&json!({"seq": i}), &RuleFilter::All, t0());
    }

    let history = engine.history();
    assert_eq!(history.len(), 5);
    assert_eq!(history.iter().next().unwrap().data["seq"], 1);
    assert_eq!(engine.statistics().event_history_size, 5);

    engine.clear_history();
    assert!(engine.history().is_empty());
}

fn record_series(engine: &mut RuleEngine, field: &str, values: &[f64]) -> DateTime<Utc> {
    let start = t0();
    for (i, v) in values.iter().enumerate() {
        engine.evaluate_rules_at(
            &json!({ field: v }),
            &RuleFilter::All,
            start + Duration::minutes(i as i64),
        );
    }
    start + Duration::minutes(values.len() as i64)
}

#[test]
fn test_detect_anomaly_from_history() {
    let mut engine = engine_with_capacity(100);
    let now = record_series(&mut engine, "x", &[10.0, 10.0, 10.0, 10.0, 100.0]);

    let patterns = engine.detect_patterns_at(PatternKind::Anomaly, 30, now);
    assert_eq!(patterns.len(), 1);
    match &patterns[0] {
        DetectedPattern::Anomaly(a) => {
            assert_eq!(a.field, "x");
            assert_eq!(a.severity, Severity::High);
        }
        other => panic!("unexpected pattern: {other:?}"),
    }
}

#[test]
fn test_detect_trend_and_spike_from_history() {
    let mut engine = engine_with_capacity(100);
    let now = record_series(&mut engine, "y", &[1.0, 2.0, 3.0, 4.0, 5.0]);

    let trends = engine.detect_patterns_at(PatternKind::Trend, 30, now);
    let DetectedPattern::Trend(trend) = &trends[0] else {
        panic!("expected trend");
    };
    assert_eq!(trend.direction, TrendDirection::Increasing);
    assert!((trend.slope - 1.0).abs() < 1e-9);

    engine.clear_history();
    let now = record_series(&mut engine, "z", &[10.0, 10.0, 10.0, 50.0]);
    let spikes = engine.detect_patterns_at(PatternKind::Spike, 30, now);
    let DetectedPattern::Spike(spike) = &spikes[0] else {
        panic!("expected spike");
    };
    assert_eq!(spike.position, 3);
    assert_eq!(spike.magnitude, 5.0);
    assert_eq!(spike.severity, Severity::High);
}

#[test]
fn test_lookback_excludes_old_events() {
    let mut engine = engine_with_capacity(100);
    let end = record_series(&mut engine, "z", &[10.0, 10.0, 10.0, 50.0]);

    // Only the newest record falls inside a two-minute window
    assert!(engine.detect_all_patterns_at(2, end).is_empty());
    assert!(!engine.detect_all_patterns_at(30, end).is_empty());
}

// ============================================================================
// Import / export
// ============================================================================

#[test]
fn test_export_import_round_trip() {
    let mut source = engine_with_capacity(10);
    source
        .add_rule(
            Rule::new("overheat", "Overheat", RuleType::Threshold)
                .with_description("Boiler above limit")
                .with_priority(9)
                .with_cooldown_minutes(15)
                .with_condition(Condition::new("temperature", Operator::GreaterThan, json!(90)))
                .with_condition(
                    Condition::new("zone", Operator::In, json!(["boiler", "plant"])).with_weight(0.5),
                ),
        )
        .unwrap();
    source
        .add_rule(
            Rule::new("odd", "Odd logic", RuleType::Composite)
                .with_logic("xor")
                .with_condition(Condition::new("a", Operator::Exists, Value::Null)),
        )
        .unwrap();

    let exported = source.export_rules();
    let values: Vec<Value> = exported
        .iter()
        .map(|d| serde_json::to_value(d).unwrap())
        .collect();

    let mut target = engine_with_capacity(10);
    target
        .add_rule(Rule::new("overheat", "Stale copy", RuleType::Threshold))
        .unwrap();

    let summary = target.import_rules(values, true);
    assert_eq!(summary.imported_count, 2);
    assert_eq!(summary.error_count, 0);

    let mut reimported = target.export_rules();
    let mut original = exported;
    for def in reimported.iter_mut().chain(original.iter_mut()) {
        def.updated_at = None;
    }
    reimported.sort_by(|a, b| a.id.cmp(&b.id));
    original.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(reimported, original);
    assert_eq!(target.get_rule("odd").unwrap().logic_operator.to_string(), "xor");
}
