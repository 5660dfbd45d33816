//! Error Handling Module
//!
//! Defines the fatal error type for dataset preparation.
//! Per-file validation problems are not errors: they are reported as
//! [`InvalidReason`](crate::dataset::validator::InvalidReason) values and
//! aggregated into reports instead of aborting a scan.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dataset preparation operations
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Split ratios are out of range or do not sum to 1.0
    #[error("Invalid split ratios (train={train}, validation={validation}, test={test}): {reason}")]
    InvalidRatios {
        train: f64,
        validation: f64,
        test: f64,
        reason: String,
    },

    /// The training subset has no samples, so no weights can be derived
    #[error("Training set is empty; cannot compute class weights")]
    EmptyTrainingSet,

    /// A persisted split file disagrees with itself
    #[error("Corrupt split manifest for subset '{subset}': {reason}")]
    CorruptManifest { subset: String, reason: String },

    /// The raw source root does not exist
    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    /// A class name that is not part of the configured class list
    #[error("Unknown class '{0}'")]
    UnknownClass(String),

    /// A label index outside the configured class list
    #[error("Label {label} is out of range for {num_classes} classes")]
    InvalidLabel { label: usize, num_classes: usize },

    /// An operation was requested in the wrong pipeline state
    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Image decoding/encoding error outside of validation
    #[error("Image error: {0}")]
    Image(String),
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        DatasetError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for DatasetError {
    fn from(err: image::ImageError) -> Self {
        DatasetError::Image(err.to_string())
    }
}

impl From<tempfile::PersistError> for DatasetError {
    fn from(err: tempfile::PersistError) -> Self {
        DatasetError::Io(err.error)
    }
}

/// Convenience Result type for dataset preparation
pub type Result<T> = std::result::Result<T, DatasetError>;
