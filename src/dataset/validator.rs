//! Image validation for raw dataset files
//!
//! Every candidate file is checked, in order, for:
//! 1. decodability (`CorruptImage`)
//! 2. a three-channel RGB color mode as stored in the file (`UnsupportedColorMode`)
//! 3. minimum resolution (`ResolutionTooLow`)
//! 4. file size band (`SizeOutOfBounds`)
//! 5. allow-listed container format (`UnsupportedFormat`)
//!
//! The first failing check decides the outcome. Validation never returns an
//! error for a bad file: it returns [`Validation::Invalid`] so callers can
//! aggregate problems into a [`ValidationReport`] and keep scanning.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{list_images, ClassList};
use crate::utils::error::{DatasetError, Result};

/// Image container formats the validator knows how to name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Gif,
    WebP,
}

impl FileFormat {
    fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(FileFormat::Jpeg),
            ImageFormat::Png => Some(FileFormat::Png),
            ImageFormat::Bmp => Some(FileFormat::Bmp),
            ImageFormat::Tiff => Some(FileFormat::Tiff),
            ImageFormat::Gif => Some(FileFormat::Gif),
            ImageFormat::WebP => Some(FileFormat::WebP),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileFormat::Jpeg => "JPEG",
            FileFormat::Png => "PNG",
            FileFormat::Bmp => "BMP",
            FileFormat::Tiff => "TIFF",
            FileFormat::Gif => "GIF",
            FileFormat::WebP => "WEBP",
        };
        write!(f, "{}", name)
    }
}

/// Validator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum image width in pixels
    pub min_width: u32,
    /// Minimum image height in pixels
    pub min_height: u32,
    /// Smallest accepted file size in bytes (inclusive)
    pub min_file_size: u64,
    /// Largest accepted file size in bytes (inclusive)
    pub max_file_size: u64,
    /// Accepted container formats
    pub allowed_formats: Vec<FileFormat>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_width: 224,
            min_height: 224,
            min_file_size: 1024,
            max_file_size: 10 * 1024 * 1024,
            allowed_formats: vec![FileFormat::Jpeg, FileFormat::Png],
        }
    }
}

impl ValidatorConfig {
    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.min_file_size > self.max_file_size {
            return Err(DatasetError::Config(format!(
                "min_file_size ({}) exceeds max_file_size ({})",
                self.min_file_size, self.max_file_size
            )));
        }
        if self.allowed_formats.is_empty() {
            return Err(DatasetError::Config(
                "At least one image format must be allowed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a file was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidReason {
    #[error("corrupt or unreadable image: {detail}")]
    CorruptImage { detail: String },

    #[error("unsupported color mode {mode} (expected 3-channel RGB)")]
    UnsupportedColorMode { mode: String },

    #[error("resolution {width}x{height} is below the minimum {min_width}x{min_height}")]
    ResolutionTooLow {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },

    #[error("file size {size} bytes is outside [{min}, {max}]")]
    SizeOutOfBounds { size: u64, min: u64, max: u64 },

    #[error("unsupported format {format}")]
    UnsupportedFormat { format: String },
}

/// Properties of a file that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: FileFormat,
    pub file_size: u64,
}

/// Outcome of validating one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(ImageInfo),
    Invalid(InvalidReason),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    /// The rejection reason, if any
    pub fn reason(&self) -> Option<&InvalidReason> {
        match self {
            Validation::Valid(_) => None,
            Validation::Invalid(reason) => Some(reason),
        }
    }
}

/// Read-only checker for raw image files
#[derive(Debug, Clone, Default)]
pub struct ImageValidator {
    config: ValidatorConfig,
}

impl ImageValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a single file
    pub fn validate(&self, path: &Path) -> Validation {
        let corrupt = |detail: String| Validation::Invalid(InvalidReason::CorruptImage { detail });

        let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
            Ok(reader) => reader,
            Err(e) => return corrupt(e.to_string()),
        };
        let detected = reader.format();

        let decoder = match reader.into_decoder() {
            Ok(decoder) => decoder,
            Err(e) => return corrupt(e.to_string()),
        };
        let (width, height) = decoder.dimensions();
        // Color mode as stored in the file, before any palette expansion
        let stored_color = decoder.original_color_type();

        if let Err(e) = DynamicImage::from_decoder(decoder) {
            return corrupt(e.to_string());
        }

        if !is_three_channel(stored_color) {
            return Validation::Invalid(InvalidReason::UnsupportedColorMode {
                mode: format!("{:?}", stored_color),
            });
        }

        if width < self.config.min_width || height < self.config.min_height {
            return Validation::Invalid(InvalidReason::ResolutionTooLow {
                width,
                height,
                min_width: self.config.min_width,
                min_height: self.config.min_height,
            });
        }

        let file_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => return corrupt(e.to_string()),
        };
        if file_size < self.config.min_file_size || file_size > self.config.max_file_size {
            return Validation::Invalid(InvalidReason::SizeOutOfBounds {
                size: file_size,
                min: self.config.min_file_size,
                max: self.config.max_file_size,
            });
        }

        match detected.and_then(FileFormat::from_image_format) {
            Some(format) if self.config.allowed_formats.contains(&format) => {
                Validation::Valid(ImageInfo {
                    width,
                    height,
                    format,
                    file_size,
                })
            }
            Some(format) => Validation::Invalid(InvalidReason::UnsupportedFormat {
                format: format.to_string(),
            }),
            None => Validation::Invalid(InvalidReason::UnsupportedFormat {
                format: detected
                    .map(|f| format!("{:?}", f))
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    /// Validate every candidate file of a raw tree without copying anything
    ///
    /// Missing class directories are reported with zero counts. Fails only if
    /// `root` itself does not exist.
    pub fn validate_tree(&self, root: &Path, classes: &ClassList) -> Result<ValidationReport> {
        if !root.is_dir() {
            return Err(DatasetError::SourceNotFound(root.to_path_buf()));
        }
        info!("Validating raw images under {:?}", root);

        let mut report = ValidationReport::new(classes);
        for (_, class_name) in classes.iter() {
            let class_dir = root.join(class_name);
            if !class_dir.is_dir() {
                warn!("Class directory not found: {:?}", class_dir);
                report.mark_missing(class_name);
                continue;
            }

            let files = list_images(&class_dir)?;
            let outcomes: Vec<(PathBuf, Validation)> = files
                .into_par_iter()
                .map(|path| {
                    let outcome = self.validate(&path);
                    (path, outcome)
                })
                .collect();

            for (path, outcome) in &outcomes {
                report.record(class_name, path, outcome);
            }
            debug!(class = class_name, files = outcomes.len(), "validated class directory");
        }

        info!(
            "Validation finished: {}/{} files valid",
            report.total_valid(),
            report.total_checked()
        );
        Ok(report)
    }
}

fn is_three_channel(color: ExtendedColorType) -> bool {
    matches!(
        color,
        ExtendedColorType::Rgb8 | ExtendedColorType::Rgb16 | ExtendedColorType::Rgb32F
    )
}

/// Per-class validation counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassValidationStats {
    pub class_name: String,
    pub checked: usize,
    pub valid: usize,
    /// True when the class directory was absent from the source tree
    pub missing_directory: bool,
}

impl ClassValidationStats {
    pub fn invalid(&self) -> usize {
        self.checked - self.valid
    }
}

/// One rejected file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: PathBuf,
    pub class_name: String,
    pub reason: InvalidReason,
}

/// Aggregated validation results, in class-list order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub classes: Vec<ClassValidationStats>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new(classes: &ClassList) -> Self {
        Self {
            classes: classes
                .iter()
                .map(|(_, name)| ClassValidationStats {
                    class_name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            issues: Vec::new(),
        }
    }

    fn stats_mut(&mut self, class_name: &str) -> &mut ClassValidationStats {
        let pos = match self.classes.iter().position(|c| c.class_name == class_name) {
            Some(pos) => pos,
            None => {
                self.classes.push(ClassValidationStats {
                    class_name: class_name.to_string(),
                    ..Default::default()
                });
                self.classes.len() - 1
            }
        };
        &mut self.classes[pos]
    }

    /// Record the outcome for one file
    pub fn record(&mut self, class_name: &str, path: &Path, outcome: &Validation) {
        let stats = self.stats_mut(class_name);
        stats.checked += 1;
        match outcome {
            Validation::Valid(_) => stats.valid += 1,
            Validation::Invalid(reason) => {
                debug!("Rejected {:?}: {}", path, reason);
                self.issues.push(ValidationIssue {
                    path: path.to_path_buf(),
                    class_name: class_name.to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }

    /// Note that a class directory was missing from the source
    pub fn mark_missing(&mut self, class_name: &str) {
        self.stats_mut(class_name).missing_directory = true;
    }

    pub fn class(&self, class_name: &str) -> Option<&ClassValidationStats> {
        self.classes.iter().find(|c| c.class_name == class_name)
    }

    pub fn total_checked(&self) -> usize {
        self.classes.iter().map(|c| c.checked).sum()
    }

    pub fn total_valid(&self) -> usize {
        self.classes.iter().map(|c| c.valid).sum()
    }

    pub fn total_invalid(&self) -> usize {
        self.total_checked() - self.total_valid()
    }

    /// Fraction of checked files that were valid (0.0 when nothing was checked)
    pub fn success_rate(&self) -> f64 {
        let checked = self.total_checked();
        if checked == 0 {
            0.0
        } else {
            self.total_valid() as f64 / checked as f64
        }
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Validation Summary:")?;
        for stats in &self.classes {
            if stats.missing_directory {
                writeln!(f, "  {:20} directory not found", stats.class_name)?;
            } else {
                writeln!(
                    f,
                    "  {:20} {:5} valid / {:5} checked",
                    stats.class_name, stats.valid, stats.checked
                )?;
            }
        }
        writeln!(
            f,
            "  Total: {} valid, {} invalid ({:.1}% success)",
            self.total_valid(),
            self.total_invalid(),
            self.success_rate() * 100.0
        )
    }
}
