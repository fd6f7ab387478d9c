//! Executor configuration.
//!
//! Loaded from JSON values or TOML documents:
//!
//! ```toml
//! provider_id = "openai"
//! max_recursion_depth = 5
//! logging = true
//!
//! [provider_options]
//! mode = "chat"
//!
//! [prompt_tool_use]
//! enabled = true
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::DEFAULT_MAX_RECURSION_DEPTH;
use crate::errors::ConfigError;
use crate::plugins::PromptToolUseConfig;

fn default_max_recursion_depth() -> usize {
    DEFAULT_MAX_RECURSION_DEPTH
}

/// Settings of a [`RuntimeExecutor`](crate::executor::RuntimeExecutor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Provider used for bare model ids.
    pub provider_id: String,
    /// Passed to the model resolver; `mode = "chat"` selects chat variants.
    #[serde(default)]
    pub provider_options: HashMap<String, Value>,
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Installs the prompt tool-use plugin when present.
    #[serde(default)]
    pub prompt_tool_use: Option<PromptToolUseConfig>,
    /// Installs the logging plugin.
    #[serde(default)]
    pub logging: bool,
}

impl ExecutorConfig {
    /// Minimal config for `provider_id`.
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_options: HashMap::new(),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            prompt_tool_use: None,
            logging: false,
        }
    }

    /// Build from a JSON value, validating required fields.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Some(obj) = value.as_object() else {
            return Err(ConfigError::Parse {
                message: "config must be a JSON object".into(),
            });
        };
        if !obj.contains_key("provider_id") {
            return Err(ConfigError::Missing {
                field: "provider_id".into(),
            });
        }
        let config: Self = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        let json = serde_json::to_value(value).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        Self::from_value(json)
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.provider_id.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "provider_id".into(),
            });
        }
        Ok(self)
    }
}
