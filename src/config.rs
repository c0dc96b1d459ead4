//! # Engine Configuration
//!
//! Runtime knobs for the decoding engine, loaded from a JSON file. Every field
//! has a default, so an empty object (or no file at all) is a valid config.
//!
//! ```json
//! {
//!   "script": { "timeout_ms": 500, "loop_iteration_limit": 1000000, "worker": "/usr/bin/mioty-decode" },
//!   "passthrough_unknown": false,
//!   "normalizer": { "excluded_keys": ["rssi"], "round_decimals": 2 }
//! }
//! ```

use crate::constants::{
    DEFAULT_LOOP_ITERATION_LIMIT, DEFAULT_RECURSION_LIMIT, DEFAULT_SCRIPT_TIMEOUT_MS,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub script: ScriptConfig,
    /// Report unassigned devices as raw hex instead of failing.
    pub passthrough_unknown: bool,
    pub normalizer: NormalizerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            script: ScriptConfig::default(),
            passthrough_unknown: true,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Execution budget for sandboxed script units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub timeout_ms: u64,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
    /// Executable that runs script jobs. Found next to the current
    /// executable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<PathBuf>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            worker: None,
        }
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Keys dropped in addition to the built-in exclusion list.
    pub excluded_keys: Vec<String>,
    /// Round float measurements to this many decimals. Off by default.
    pub round_decimals: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.passthrough_unknown);
        assert_eq!(config.script.timeout(), Duration::from_millis(1000));
        assert_eq!(config.script.recursion_limit, 256);
        assert_eq!(config.normalizer.round_decimals, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "script": { "timeout_ms": 250 } }"#).unwrap();
        assert_eq!(config.script.timeout_ms, 250);
        assert_eq!(config.script.loop_iteration_limit, DEFAULT_LOOP_ITERATION_LIMIT);
        assert!(config.passthrough_unknown);
        assert_eq!(config.script.worker, None);

        let config =
            EngineConfig::from_json(r#"{ "script": { "worker": "/opt/mioty/bin/mioty-decode" } }"#).unwrap();
        assert_eq!(
            config.script.worker.as_deref(),
            Some(Path::new("/opt/mioty/bin/mioty-decode"))
        );
        assert_eq!(config.script.timeout_ms, DEFAULT_SCRIPT_TIMEOUT_MS);

        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
        assert!(matches!(
            EngineConfig::from_json("[1]"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/mioty.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
