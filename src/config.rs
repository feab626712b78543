//! Configuration management for vidsqueeze
//! Handles loading and saving defaults to settings.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{CompressionSettings, QualityMode, Variant, APP_NAME};

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// x264 speed preset passed to ffmpeg
    #[serde(default = "default_encoding_preset")]
    pub encoding_preset: String,
    /// AAC audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Quality mode used when no flag is given
    #[serde(default)]
    pub quality_mode: QualityMode,
    /// CRF used in manual mode
    #[serde(default = "default_manual_crf")]
    pub manual_crf: u32,
    #[serde(default)]
    pub variant: Variant,
    /// Where compressed files go; next to the input when unset
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Interface language, a file name under locales/
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_encoding_preset() -> String {
    "medium".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_manual_crf() -> u32 {
    23
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encoding_preset: default_encoding_preset(),
            audio_bitrate: default_audio_bitrate(),
            quality_mode: QualityMode::default(),
            manual_crf: default_manual_crf(),
            variant: Variant::default(),
            output_dir: None,
            language: default_language(),
        }
    }
}

impl AppConfig {
    /// Configuration file name
    const CONFIG_FILE: &'static str = "settings.json";

    /// settings.json in the working directory, then in the user config dir
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(Self::CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(APP_NAME).join(Self::CONFIG_FILE));
        }
        paths
    }

    /// Load the first configuration file found, or defaults
    pub fn load() -> Result<Self> {
        for path in Self::candidate_paths() {
            if path.exists() {
                log::debug!("Loading configuration from {}", path.display());
                return Self::load_from(&path);
            }
        }
        log::debug!("No settings.json found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(content)?;
        if config.manual_crf > crate::types::MAX_QUALITY_FACTOR {
            return Err(anyhow::anyhow!(
                "manual_crf must be between 0 and {}",
                crate::types::MAX_QUALITY_FACTOR
            ));
        }
        Ok(config)
    }

    /// Create a default configuration file in the working directory
    pub fn create_default() -> Result<PathBuf> {
        let path = PathBuf::from(Self::CONFIG_FILE);
        Self::default().save(&path)?;
        Ok(path)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Encoder settings passed through to ffmpeg
    pub fn compression_settings(&self) -> CompressionSettings {
        CompressionSettings {
            preset: self.encoding_preset.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig {
            encoding_preset: "veryslow".to_string(),
            quality_mode: QualityMode::Manual,
            manual_crf: 30,
            variant: Variant::Basic,
            output_dir: Some("./out".to_string()),
            language: "es".to_string(),
            ..AppConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"quality_mode\":\"manual\""));
        assert!(json.contains("\"variant\":\"basic\""));
        assert!(json.contains("\"language\":\"es\""));
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AppConfig::parse(r#"{ "encoding_preset": "fast" }"#).unwrap();
        assert_eq!(config.encoding_preset, "fast");
        assert_eq!(config.audio_bitrate, "128k");
        assert_eq!(config.quality_mode, QualityMode::Auto);
        assert_eq!(config.manual_crf, 23);
        assert_eq!(config.variant, Variant::Advanced);
        assert_eq!(config.output_dir, None);
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_config_rejects_bad_crf() {
        assert!(AppConfig::parse(r#"{ "manual_crf": 70 }"#).is_err());
    }

    #[test]
    fn test_compression_settings() {
        let settings = AppConfig::default().compression_settings();
        assert_eq!(settings, CompressionSettings::default());
    }
}
