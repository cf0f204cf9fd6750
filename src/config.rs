//! Engine configuration

use crate::audio::CaptureConfig;
use crate::director::DirectorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Capture and director settings. Missing keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub director: DirectorConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::VisualSystem;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "capture": { "measure_beats": 8, "fallback_system": "polychora" },
                "director": { "sensitivity": 1.5, "rng_seed": 42 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.capture.measure_beats, 8);
        assert_eq!(config.capture.fallback_system, VisualSystem::Polychora);
        assert_eq!(config.capture.mic_history, 48);
        assert_eq!(config.director.sensitivity, 1.5);
        assert_eq!(config.director.rng_seed, Some(42));
        assert_eq!(config.director.history, 96);
        assert_eq!(config.director.cooldowns.quantum, 650.0);
    }

    #[test]
    fn defaults_survive_a_json_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(matches!(
            EngineConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_file("/definitely/not/a/config.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
