//! Application Configuration
//!
//! Detector settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame handling and engine selection
    pub vision: VisionSettings,
    /// Text detection model settings
    pub detection: DetectionSettings,
    /// Text recognition model settings
    pub recognition: RecognitionSettings,
}

/// Frame handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Language codes the OCR engine is set up for
    pub languages: Vec<String>,
    /// Frames wider than this are downscaled before OCR
    pub max_width: u32,
    /// Frames taller than this are downscaled before OCR
    pub max_height: u32,
    /// Try GPU execution providers when loading models
    pub use_gpu: bool,
    /// Model directory; the platform data dir is used when unset
    pub models_dir: Option<PathBuf>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            max_width: 640,
            max_height: 480,
            use_gpu: false,
            models_dir: None,
        }
    }
}

/// DB text detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Longest image side fed to the detection model
    pub limit_side_len: u32,
    /// Probability above which a pixel counts as text
    pub binary_threshold: f32,
    /// Minimum mean probability for a text region to be kept
    pub box_threshold: f32,
    /// How far regions are grown past the shrunk text kernel
    pub unclip_ratio: f32,
    /// Regions with a shorter side (in model pixels) are dropped
    pub min_box_size: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            limit_side_len: 960,
            binary_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_box_size: 3,
        }
    }
}

/// CRNN text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Height text crops are resized to
    pub target_height: u32,
    /// Widest crop passed to the model after resizing
    pub max_width: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            target_height: 48,
            max_width: 320,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration from `path`, writing the defaults there first if the
/// file does not exist yet
pub fn load_or_create_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return load_config(path);
    }

    let config = AppConfig::default();
    save_config(&config, path)?;
    info!("Wrote default configuration to {:?}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.vision.languages, vec!["en".to_string()]);
        assert_eq!(config.vision.max_width, 640);
        assert_eq!(config.vision.max_height, 480);
        assert!(!config.vision.use_gpu);
        assert!(config.vision.models_dir.is_none());

        assert_eq!(config.detection.limit_side_len, 960);
        assert!((config.detection.binary_threshold - 0.3).abs() < 0.001);
        assert!((config.detection.box_threshold - 0.6).abs() < 0.001);
        assert!((config.detection.unclip_ratio - 1.5).abs() < 0.001);

        assert_eq!(config.recognition.target_height, 48);
        assert_eq!(config.recognition.max_width, 320);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.vision.max_width = 1280;
        config.vision.models_dir = Some(PathBuf::from("/opt/models"));
        config.detection.box_threshold = 0.7;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.vision.max_width, 1280);
        assert_eq!(parsed.vision.models_dir, Some(PathBuf::from("/opt/models")));
        assert!((parsed.detection.box_threshold - 0.7).abs() < 0.001);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[vision]\nmax_height = 720\n").unwrap();

        assert_eq!(parsed.vision.max_height, 720);
        assert_eq!(parsed.vision.max_width, 640);
        assert_eq!(parsed.vision.languages, vec!["en".to_string()]);
        assert_eq!(parsed.recognition.target_height, 48);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.vision.max_width, loaded.vision.max_width);
        assert_eq!(config.detection.min_box_size, loaded.detection.min_box_size);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let created = load_or_create_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.vision.max_width, 640);

        std::fs::write(&path, "[vision]\nmax_width = 800\n").unwrap();
        let loaded = load_or_create_config(&path).unwrap();
        assert_eq!(loaded.vision.max_width, 800);
        assert_eq!(loaded.vision.max_height, 480);
    }

    #[test]
    fn test_load_or_create_keeps_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        assert!(load_or_create_config(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not = [valid");
    }
}
