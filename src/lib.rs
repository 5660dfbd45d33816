//! # Ginger Dataset
//!
//! Dataset preparation for multi-class ginger disease classification.
//!
//! Turns loosely organized folders of field photos into a validated,
//! consistently named per-class tree, splits it into train / validation / test
//! subsets with per-class stratification, computes class weights for
//! imbalanced data and serves the result to a Burn training loop with
//! on-the-fly augmentation.
//!
//! ## Modules
//!
//! - `dataset`: validation, organization, splitting, weights, augmentation, loading
//! - `pipeline`: the stage-by-stage preparation session
//! - `config`: the JSON pipeline configuration
//! - `utils`: logging, errors and helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ginger_dataset::{PipelineConfig, PreparationSession, Subset};
//! use burn::data::dataset::Dataset;
//!
//! let config = PipelineConfig::with_root("data");
//! let mut session = PreparationSession::new(config)?;
//! session.run("raw_photos".as_ref())?;
//!
//! let prepared = session.open_prepared()?;
//! let train = prepared.subset(Subset::Train, 0);
//! println!("{} training images", train.len());
//! ```

pub mod config;
pub mod dataset;
pub mod pipeline;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{
    compute_class_weights, split_counts, AugmentationConfig, AugmentationPipeline,
    AugmentedImage, ClassList, ClassWeightMap, DatasetManifest, DatasetOrganizer, ImageRecord,
    ImageShape, ImageValidator, InvalidReason, OrganizeReport, PersistedSplit, PreparedDataset,
    SplitAssignment, SplitRatios, SplitReader, SplitWriter, StratifiedSplitter, Subset,
    SubsetDataset, TrainingItem, Validation, ValidationReport,
};
pub use pipeline::{PipelineState, PreparationSession};
pub use utils::error::{DatasetError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
