//! Engine configuration: preview, audio, decoder and export settings.
//!
//! Every section is `#[serde(default)]` so a config file only needs to name
//! the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub preview: PreviewConfig,
    pub audio: AudioConfig,
    pub decoder: DecoderConfig,
    pub export: ExportSettings,
}

/// Interactive preview settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Coalescing window for time updates driving frame requests.
    pub throttle_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { throttle_ms: 50 }
    }
}

/// Output format of the audio scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Video decode cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Decode the following frame in the background after each request.
    pub prefetch: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { prefetch: true }
    }
}

/// Export loop settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub include_audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            include_audio: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be > 0".into()));
        }
        if self.audio.channels == 0 || self.audio.channels > 2 {
            return Err(ConfigError::Invalid(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        Ok(())
    }
}
