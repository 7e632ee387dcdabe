//! Configuration parsing and management.

use crate::abi::{CanvasSize, RuntimeLimits};
use crate::lines::WRAPPER_LINE_OFFSET;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Runtime configuration matching the codepad.yml schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Delay between the last code change and a re-run (console variant)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub canvas: CanvasSize,

    #[serde(default)]
    pub limits: RuntimeLimits,

    /// Lines the wrapper template adds before the learner's first line
    #[serde(default = "default_line_offset")]
    pub line_offset: u32,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_line_offset() -> u32 {
    WRAPPER_LINE_OFFSET
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            canvas: CanvasSize::default(),
            limits: RuntimeLimits::default(),
            line_offset: default_line_offset(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.canvas.width, 400);
        assert_eq!(config.line_offset, 1);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "debounce_ms: 50\nlimits:\n  max_memory: 1024\n";
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.limits.max_memory, 1024);
        assert_eq!(config.limits.max_execution_time_ms, 5000);
        assert_eq!(config.canvas, CanvasSize::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(RuntimeConfig::from_yaml("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = RuntimeConfig::default().to_yaml().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = RuntimeConfig::from_yaml("debounce_ms: [not, a, number]");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
