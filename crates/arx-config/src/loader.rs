//! YAML loader with custom tag support
//!
//! - `!include path` - Include another YAML file
//! - `!env_var VAR` - Environment variable substitution
//!
//! Any other tag is kept as-is with its inner value processed.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving includes relative to a base directory
#[derive(Debug)]
pub struct YamlLoader {
    config_dir: PathBuf,
    /// Files currently being loaded, for circular include detection
    loading: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            loading: HashSet::new(),
        }
    }

    /// Read a file and expand its tags
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.absolute(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.loading.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.loading.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.loading.remove(&path);

        result
    }

    /// Expand tags in an in-memory document
    ///
    /// `source_path` names the document in errors and anchors relative includes.
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.expand(value, source_path)
    }

    fn expand(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.expand_tag(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = Mapping::new();
                for (k, v) in map {
                    let key = self.expand(k, source_path)?;
                    let value = self.expand(v, source_path)?;
                    result.insert(key, value);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let result: ConfigResult<Vec<Value>> = seq
                    .into_iter()
                    .map(|v| self.expand(v, source_path))
                    .collect();
                Ok(Value::Sequence(result?))
            }
            _ => Ok(value),
        }
    }

    fn expand_tag(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, value = ?tagged.value, "Processing tag");

        match tag.as_str() {
            "!include" => self.expand_include(tagged.value, source_path),
            "!env_var" => self.expand_env_var(tagged.value),
            _ => {
                let processed = self.expand(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    fn expand_include(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        let include_path = self.include_target(&value, source_path)?;
        if !include_path.is_file() {
            return Err(ConfigError::IncludeNotFound { path: include_path });
        }
        debug!(path = %include_path.display(), "Including file");
        self.load_file(&include_path)
    }

    /// `!env_var NAME` or `!env_var NAME default`
    fn expand_env_var(&self, value: Value) -> ConfigResult<Value> {
        let raw = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!env_var".to_string(),
                    reason: "expected a variable name".to_string(),
                })
            }
        };

        let (var_name, default) = match raw.split_once(char::is_whitespace) {
            Some((name, default)) => (name, Some(default.trim())),
            None => (raw.as_str(), None),
        };

        let env_value = match (std::env::var(var_name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVarNotFound {
                    var: var_name.to_string(),
                })
            }
        };

        debug!(var = var_name, "Substituted env var");
        // Numbers and booleans keep their YAML type
        match serde_yaml::from_str::<Value>(&env_value) {
            Ok(scalar @ (Value::Number(_) | Value::Bool(_))) => Ok(scalar),
            _ => Ok(Value::String(env_value)),
        }
    }

    /// Resolve an include target relative to the including file
    fn include_target(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let path_str = match value {
            Value::String(s) if !s.trim().is_empty() => s.trim(),
            _ => {
                return Err(ConfigError::InvalidIncludePath {
                    path: format!("{value:?}"),
                    reason: "path must be a non-empty string".to_string(),
                })
            }
        };

        let base_dir = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(&self.config_dir);
        let resolved = if Path::new(path_str).is_absolute() {
            PathBuf::from(path_str)
        } else {
            base_dir.join(path_str)
        };

        Ok(resolved)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Read `file` under `config_dir` and expand its tags
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

/// Expand tags in `content`; includes resolve under `config_dir`
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_string(content, Path::new(source_name))
}
