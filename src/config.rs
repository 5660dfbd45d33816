//! Pipeline Configuration
//!
//! One serde document that configures every stage. Every section is optional
//! in the JSON file and falls back to its defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::organizer::OrganizerConfig;
use crate::dataset::split::SplitConfig;
use crate::dataset::validator::ValidatorConfig;
use crate::dataset::{ClassList, ImageShape};
use crate::utils::error::{DatasetError, Result};
use crate::utils::logging::LogConfig;
use crate::utils::write_atomic;

/// Configuration for the whole preparation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ordered class names; position is the label index
    pub classes: ClassList,
    /// Root of the canonical per-class tree
    pub canonical_root: PathBuf,
    /// Directory receiving the split files and class weights
    pub split_dir: PathBuf,
    pub validator: ValidatorConfig,
    pub organizer: OrganizerConfig,
    pub split: SplitConfig,
    pub augmentation: AugmentationConfig,
    pub logging: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classes: ClassList::default(),
            canonical_root: PathBuf::from("data/processed"),
            split_dir: PathBuf::from("data/splits"),
            validator: ValidatorConfig::default(),
            organizer: OrganizerConfig::default(),
            split: SplitConfig::default(),
            augmentation: AugmentationConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted under one working directory
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            canonical_root: root.join("processed"),
            split_dir: root.join("splits"),
            ..Default::default()
        }
    }

    /// Shape of the tensors produced for training
    pub fn image_shape(&self) -> ImageShape {
        ImageShape::rgb(self.augmentation.target_height, self.augmentation.target_width)
    }

    /// Validate every section; no file is touched
    pub fn validate(&self) -> Result<()> {
        if self.canonical_root.as_os_str().is_empty() {
            return Err(DatasetError::Config("canonical_root must not be empty".to_string()));
        }
        if self.split_dir.as_os_str().is_empty() {
            return Err(DatasetError::Config("split_dir must not be empty".to_string()));
        }
        if !(1..=12).contains(&self.organizer.index_width) {
            return Err(DatasetError::Config(format!(
                "organizer.index_width {} must be between 1 and 12",
                self.organizer.index_width
            )));
        }
        self.validator.validate()?;
        self.split.ratios.validate()?;
        self.augmentation.validate()?;
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| DatasetError::Config(format!("{:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::split::SplitRatios;
    use crate::utils::logging::LogLevel;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classes.len(), 7);
        assert_eq!(config.image_shape(), ImageShape::rgb(224, 224));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{
                "classes": ["healthy", "leaf_spot"],
                "split": { "seed": 7 },
                "logging": { "level": "debug", "ansi_colors": false }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.classes.len(), 2);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.ratios, SplitRatios::default());
        assert_eq!(config.validator, ValidatorConfig::default());
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(!config.logging.ansi_colors);
        assert!(config.logging.timestamps);
    }

    #[test]
    fn test_invalid_ratios_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{ "split": { "ratios": { "train": 0.5, "validation": 0.1, "test": 0.1 } } }"#,
        )
        .unwrap();

        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(DatasetError::InvalidRatios { .. })
        ));
    }

    #[test]
    fn test_duplicate_classes_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "classes": ["a", "a"] }"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(DatasetError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut config = PipelineConfig::with_root(dir.path());
        config.augmentation = AugmentationConfig::light();
        config.logging = LogConfig::verbose();

        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap(), config);
    }
}
