//! YAML configuration for the rule engine and dispatcher
//!
//! Configuration files are plain YAML with two custom tags:
//!
//! - `!include path` - Include another YAML file, relative to the including file
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use arx_config::EngineConfig;
//!
//! let config = EngineConfig::load("/etc/arx/engine.yaml")?;
//! config.validate()?;
//! ```

mod engine_config;
mod error;
mod loader;

pub use engine_config::{EngineConfig, LoggingConfig, ServiceConfig};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
