use crate::error::{FlowError, Result};
use crate::types::{FuncOptions, FuncOverrides};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_name() -> String {
    "no name".to_string()
}

/// Workflow engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Workflow name reported in every event
    #[serde(default = "default_name")]
    pub name: String,

    /// Step options applied to every function of every job
    #[serde(default)]
    pub defaults: FuncOverrides,

    /// Refuse to run a graph containing a cycle
    #[serde(default)]
    pub reject_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            defaults: FuncOverrides::default(),
            reject_cycles: false,
        }
    }
}

impl EngineConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file, falling back to defaults if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FlowError::Config(format!("failed to parse configuration: {}", e)))
    }

    /// Built-in step defaults with the configured overrides applied
    pub fn func_defaults(&self) -> FuncOptions {
        FuncOptions::default().merged(&self.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path().join("fanflow.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.name, "no name");
        assert!(!config.reject_cycles);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "nightly"
reject_cycles = true

[defaults]
role = "batch"
memory_size = 512

[defaults.parameters]
source = "nightly"
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "nightly");
        assert!(config.reject_cycles);

        let defaults = config.func_defaults();
        assert_eq!(defaults.role, "batch");
        assert_eq!(defaults.memory_size, Some(512));
        assert_eq!(defaults.handler, "index.handler");
        assert_eq!(
            defaults.parameters.get("source"),
            Some(&serde_json::json!("nightly"))
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("name = [").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
