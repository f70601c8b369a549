//! Typed engine configuration
//!
//! ```yaml
//! rule_engine:
//!   history_capacity: 1000
//!   default_lookback_minutes: 30
//!   patterns:
//!     anomaly_z_threshold: 2.5
//! dispatcher:
//!   max_workers: 10
//!   default_max_concurrent_executions: 1
//! service:
//!   pattern_scan_interval_seconds: 60
//! logging:
//!   level: !env_var ARX_LOG_LEVEL info
//!   json: false
//! rules: !include rules.yaml
//! workflows: !include workflows.yaml
//! ```

use arx_rules::RuleEngineConfig;
use arx_workflow::{DispatcherConfig, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

fn default_level() -> String {
    "info".to_string()
}

/// Log output settings for the binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `arx_workflow=debug,info`
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_pattern_scan_interval() -> u64 {
    60
}

/// Settings for the bus-driven dispatch loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between pattern scans over the rule engine history
    #[serde(default = "default_pattern_scan_interval")]
    pub pattern_scan_interval_seconds: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pattern_scan_interval_seconds: default_pattern_scan_interval(),
        }
    }
}

/// Complete configuration of an engine process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rule_engine: RuleEngineConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rule definitions in export format, fed to `RuleEngine::import_rules`
    #[serde(default)]
    pub rules: Vec<JsonValue>,

    /// Workflow definitions
    #[serde(default)]
    pub workflows: Vec<JsonValue>,
}

impl EngineConfig {
    /// Load from a YAML file; includes resolve relative to its directory
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let yaml = YamlLoader::new(config_dir).load_file(path)?;
        let config = Self::from_yaml(yaml)?;
        info!(
            path = %path.display(),
            rules = config.rules.len(),
            workflows = config.workflows.len(),
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Parse from an already processed YAML value; null yields defaults
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        match yaml {
            Value::Null => Ok(Self::default()),
            Value::Mapping(_) => {
                serde_yaml::from_value(yaml).map_err(|source| ConfigError::Deserialize { source })
            }
            _ => Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            }),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();

        if self.rule_engine.history_capacity == 0 {
            problems.push("rule_engine.history_capacity must be greater than 0".to_string());
        }
        if self.rule_engine.default_lookback_minutes == 0 {
            problems.push("rule_engine.default_lookback_minutes must be greater than 0".to_string());
        }
        problems.extend(
            self.rule_engine
                .patterns
                .validation_errors()
                .into_iter()
                .map(|e| format!("rule_engine.patterns.{e}")),
        );
        if self.dispatcher.max_workers == 0 {
            problems.push("dispatcher.max_workers must be greater than 0".to_string());
        }
        if self.service.pattern_scan_interval_seconds == 0 {
            problems.push("service.pattern_scan_interval_seconds must be greater than 0".to_string());
        }
        if self.dispatcher.default_max_concurrent_executions == 0 {
            warn!("dispatcher.default_max_concurrent_executions is 0; workflows without a ceiling will never run from events");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed {
                message: problems.join("; "),
            })
        }
    }

    /// Deserialize and validate the workflow definitions
    pub fn workflow_definitions(&self) -> ConfigResult<Vec<Workflow>> {
        self.workflows
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let workflow: Workflow = serde_json::from_value(value.clone()).map_err(|e| {
                    ConfigError::WorkflowDefinition {
                        index: i,
                        reason: e.to_string(),
                    }
                })?;
                let errors = workflow.validation_errors();
                if !errors.is_empty() {
                    return Err(ConfigError::WorkflowDefinition {
                        index: i,
                        reason: errors.join("; "),
                    });
                }
                Ok(workflow)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> EngineConfig {
        EngineConfig::from_yaml(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml(Value::Null).unwrap();
        assert_eq!(config.rule_engine.history_capacity, 1000);
        assert_eq!(config.rule_engine.default_lookback_minutes, 30);
        assert_eq!(config.dispatcher.max_workers, 10);
        assert_eq!(config.dispatcher.default_max_concurrent_executions, 1);
        assert_eq!(config.service.pattern_scan_interval_seconds, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = parse("dispatcher:\n  max_workers: 3\nlogging:\n  json: true\n");
        assert_eq!(config.dispatcher.max_workers, 3);
        assert_eq!(config.dispatcher.default_max_concurrent_executions, 1);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = parse(
            "rule_engine:\n  history_capacity: 0\ndispatcher:\n  max_workers: 0\nservice:\n  pattern_scan_interval_seconds: 0\n",
        );
        match config.validate() {
            Err(ConfigError::ValidationFailed { message }) => {
                assert!(message.contains("history_capacity"));
                assert!(message.contains("max_workers"));
                assert!(message.contains("pattern_scan_interval_seconds"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_degenerate_pattern_settings() {
        let config = parse(
            "rule_engine:\n  patterns:\n    min_anomaly_points: 1\n    anomaly_z_threshold: 0\n",
        );
        assert_eq!(config.rule_engine.patterns.min_trend_points, 5);
        match config.validate() {
            Err(ConfigError::ValidationFailed { message }) => {
                assert!(message.contains("rule_engine.patterns.min_anomaly_points"));
                assert!(message.contains("rule_engine.patterns.anomaly_z_threshold"));
                assert!(!message.contains("min_trend_points"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_non_mapping_root() {
        let result = EngineConfig::from_yaml(Value::from("nope"));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_workflow_definitions() {
        let config = parse(
            r#"
workflows:
  - id: wf-cool
    name: Cool down
    status: active
    max_concurrent_executions: 2
    triggers:
      - type: threshold_breach
        name: Overheat
        conditions:
          - field: rule_id
            operator: equals
            value: overheat
"#,
        );

        let workflows = config.workflow_definitions().unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].id, "wf-cool");
        assert_eq!(workflows[0].max_concurrent_executions, Some(2));
        assert_eq!(workflows[0].triggers[0].conditions.len(), 1);

        let broken = parse("workflows:\n  - name: missing id\n");
        assert!(matches!(
            broken.workflow_definitions(),
            Err(ConfigError::WorkflowDefinition { index: 0, .. })
        ));
    }
}
