//! Preparation Pipeline
//!
//! Drives the stages in order and tracks where a dataset is:
//!
//! ```text
//! Unsplit ──organize──▶ Organized ──split──▶ Split ──persist──▶ Persisted
//! ```
//!
//! States only move forward. Organizing again after a split keeps the existing
//! split and marks it stale; new images only enter the subsets after an
//! explicit [`PreparationSession::split`]. Splitting again in `Persisted` keeps
//! the state and marks the new assignment unsaved until the next
//! [`PreparationSession::persist`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset::class_weights::{compute_class_weights, ClassWeightMap, CLASS_WEIGHTS_FILE_NAME};
use crate::dataset::export::{export_split_directories, ExportSummary};
use crate::dataset::loader::PreparedDataset;
use crate::dataset::manifest::{DatasetManifest, MANIFEST_FILE_NAME};
use crate::dataset::organizer::{DatasetOrganizer, OrganizeReport};
use crate::dataset::persist::{SplitReader, SplitWriter};
use crate::dataset::split::{scan_canonical, SplitAssignment, StratifiedSplitter, Subset};
use crate::dataset::validator::{ImageValidator, ValidationReport};
use crate::utils::error::{DatasetError, Result};

/// Where a dataset is in the preparation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing organized yet
    Unsplit,
    /// Canonical tree and manifest exist
    Organized,
    /// An assignment exists in memory
    Split,
    /// The assignment is on disk
    Persisted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Unsplit => "unsplit",
            PipelineState::Organized => "organized",
            PipelineState::Split => "split",
            PipelineState::Persisted => "persisted",
        };
        write!(f, "{}", name)
    }
}

/// One dataset preparation, from raw folders to persisted splits
#[derive(Debug)]
pub struct PreparationSession {
    config: PipelineConfig,
    organizer: DatasetOrganizer,
    state: PipelineState,
    manifest: Option<DatasetManifest>,
    assignment: Option<SplitAssignment>,
    class_weights: Option<ClassWeightMap>,
    split_is_stale: bool,
    split_is_unsaved: bool,
}

impl PreparationSession {
    /// Start a fresh session; the configuration is validated, no file is read
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let organizer = DatasetOrganizer::new(
            config.classes.clone(),
            config.canonical_root.clone(),
            ImageValidator::new(config.validator.clone()),
            config.organizer.clone(),
        );

        Ok(Self {
            config,
            organizer,
            state: PipelineState::Unsplit,
            manifest: None,
            assignment: None,
            class_weights: None,
            split_is_stale: false,
            split_is_unsaved: false,
        })
    }

    /// Pick up whatever a previous run left on disk
    ///
    /// A manifest in the canonical root means `Organized`; a readable split in
    /// `split_dir` means `Persisted`.
    pub fn resume(config: PipelineConfig) -> Result<Self> {
        let mut session = Self::new(config)?;

        let manifest_path = session.config.canonical_root.join(MANIFEST_FILE_NAME);
        if manifest_path.is_file() {
            session.manifest = Some(DatasetManifest::load(&manifest_path)?);
            session.state = PipelineState::Organized;
        }

        if SplitReader::exists(&session.config.split_dir) {
            let persisted = SplitReader::read(&session.config.split_dir)?;
            if persisted.classes != session.config.classes {
                return Err(DatasetError::Config(format!(
                    "Split in {:?} was made for classes {:?}",
                    session.config.split_dir,
                    persisted.classes.names()
                )));
            }
            let weights_path = session.config.split_dir.join(CLASS_WEIGHTS_FILE_NAME);
            if weights_path.is_file() {
                session.class_weights =
                    Some(ClassWeightMap::load(&weights_path, &session.config.classes)?);
            }
            session.assignment = Some(persisted.assignment);
            session.state = PipelineState::Persisted;
        }

        info!("Resumed preparation session in state {}", session.state);
        Ok(session)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn manifest(&self) -> Option<&DatasetManifest> {
        self.manifest.as_ref()
    }

    pub fn assignment(&self) -> Option<&SplitAssignment> {
        self.assignment.as_ref()
    }

    pub fn class_weights(&self) -> Option<&ClassWeightMap> {
        self.class_weights.as_ref()
    }

    /// True when images were organized after the current split was made
    pub fn split_is_stale(&self) -> bool {
        self.split_is_stale
    }

    /// True when the in-memory assignment differs from the one in `split_dir`
    pub fn split_is_unsaved(&self) -> bool {
        self.split_is_unsaved
    }

    /// Validate a raw tree without copying anything
    pub fn validate_source(&self, source_root: &Path) -> Result<ValidationReport> {
        ImageValidator::new(self.config.validator.clone())
            .validate_tree(source_root, &self.config.classes)
    }

    /// Organize a raw tree into the canonical tree
    pub fn organize(&mut self, source_root: &Path) -> Result<OrganizeReport> {
        let report = self.organizer.organize(source_root)?;
        self.after_organize(&report);
        Ok(report)
    }

    /// Append images from a flat directory to one class
    pub fn add_images(
        &mut self,
        class_name: &str,
        source_dir: &Path,
        limit: Option<usize>,
    ) -> Result<OrganizeReport> {
        let report = self.organizer.add_images(class_name, source_dir, limit)?;
        self.after_organize(&report);
        Ok(report)
    }

    fn after_organize(&mut self, report: &OrganizeReport) {
        self.manifest = Some(report.manifest.clone());
        if self.state == PipelineState::Unsplit {
            self.state = PipelineState::Organized;
        } else if self.state >= PipelineState::Split && report.total_copied() > 0 {
            warn!(
                "{} new images are not part of the current split; run split() to include them",
                report.total_copied()
            );
            self.split_is_stale = true;
        }
    }

    /// Split the canonical tree
    pub fn split(&mut self) -> Result<&SplitAssignment> {
        self.require(PipelineState::Organized, "split")?;

        let records = scan_canonical(&self.config.canonical_root, &self.config.classes)?;
        let assignment = StratifiedSplitter::new(self.config.split.clone())?.split(&records)?;

        self.class_weights = None;
        self.split_is_stale = false;
        self.split_is_unsaved = true;
        self.state = self.state.max(PipelineState::Split);
        Ok(self.assignment.insert(assignment))
    }

    /// Class weights from the current training subset
    pub fn compute_weights(&mut self) -> Result<&ClassWeightMap> {
        self.require(PipelineState::Split, "compute_weights")?;
        let assignment = self.current_assignment()?;
        let weights =
            compute_class_weights(&assignment.labels(Subset::Train), &self.config.classes)?;
        Ok(self.class_weights.insert(weights))
    }

    /// Write split files and class weights to `split_dir`
    pub fn persist(&mut self) -> Result<&Path> {
        self.require(PipelineState::Split, "persist")?;
        if self.class_weights.is_none() {
            self.compute_weights()?;
        }

        let dir = self.config.split_dir.as_path();
        let assignment = self.current_assignment()?;
        SplitWriter::write(dir, assignment, &self.config.classes, self.config.image_shape())?;
        if let Some(weights) = &self.class_weights {
            weights.save(&dir.join(CLASS_WEIGHTS_FILE_NAME))?;
        }

        self.split_is_unsaved = false;
        self.state = PipelineState::Persisted;
        info!("Persisted split to {:?}", dir);
        Ok(dir)
    }

    /// Copy the split into `out/<subset>/<class>/` directories
    pub fn export_directories(&self, out: &Path) -> Result<ExportSummary> {
        self.require(PipelineState::Split, "export_directories")?;
        export_split_directories(self.current_assignment()?, &self.config.classes, out)
    }

    /// Open the persisted split for training
    pub fn open_prepared(&self) -> Result<PreparedDataset> {
        self.require(PipelineState::Persisted, "open_prepared")?;
        if self.split_is_unsaved {
            return Err(DatasetError::InvalidState(
                "open_prepared: the current split is not persisted yet".to_string(),
            ));
        }
        PreparedDataset::open(&self.config.split_dir, self.config.augmentation.clone())
    }

    /// Organize, split, weigh and persist in one go
    pub fn run(&mut self, source_root: &Path) -> Result<OrganizeReport> {
        let report = self.organize(source_root)?;
        self.split()?;
        self.compute_weights()?;
        self.persist()?;
        Ok(report)
    }

    fn current_assignment(&self) -> Result<&SplitAssignment> {
        self.assignment
            .as_ref()
            .ok_or_else(|| DatasetError::InvalidState("no split assignment".to_string()))
    }

    fn require(&self, min: PipelineState, operation: &str) -> Result<()> {
        if self.state < min {
            return Err(DatasetError::InvalidState(format!(
                "{} needs state {} or later, session is {}",
                operation, min, self.state
            )));
        }
        Ok(())
    }
}
