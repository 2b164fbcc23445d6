use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine tuning. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Normal-flow opcodes executed per tick at most.
    pub instructions_per_update: usize,
    /// Opcodes a single trigger may execute in one pass before it is disarmed.
    pub trigger_instruction_limit: usize,
    pub show_statistics: bool,
    /// Source compiled and pushed as a silent program at boot.
    pub boot_script: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            instructions_per_update: 150,
            trigger_instruction_limit: 10_000,
            show_statistics: false,
            boot_script: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}
