use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The processed document does not fit `EngineConfig`
    #[error("invalid engine configuration: {source}")]
    Deserialize {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("included file not found: {path}")]
    IncludeNotFound { path: PathBuf },

    /// A file includes itself, directly or through other files
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("workflow definition #{index} is invalid: {reason}")]
    WorkflowDefinition { index: usize, reason: String },

    #[error("configuration validation failed: {message}")]
    ValidationFailed { message: String },
}
