//! Burn Dataset integration for prepared splits
//!
//! [`PreparedDataset`] opens a persisted split directory and hands out one
//! [`SubsetDataset`] per subset and epoch. Images are loaded lazily on `get`.
//! The train subset runs the full augmentation pipeline, validation and test
//! only resize and normalize. Every item's generator is seeded from
//! (split seed, epoch, index), so any item can be reproduced in isolation and
//! iteration can restart at any point.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::ImageReader;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::augmentation::{derive_seed, AugmentationConfig, AugmentationPipeline};
use super::class_weights::{compute_class_weights, ClassWeightMap, CLASS_WEIGHTS_FILE_NAME};
use super::persist::{PersistedSplit, SplitReader};
use super::split::{SplitEntry, Subset};
use super::{ClassList, ImageShape};
use crate::utils::error::{DatasetError, Result};

/// A single item ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingItem {
    /// Image data as flattened CHW float array
    pub image: Vec<f32>,
    pub shape: ImageShape,
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

/// One subset of a prepared split, for one epoch
#[derive(Debug, Clone)]
pub struct SubsetDataset {
    subset: Subset,
    entries: Vec<SplitEntry>,
    pipeline: AugmentationPipeline,
    seed: u64,
    epoch: u64,
}

impl SubsetDataset {
    pub fn subset(&self) -> Subset {
        self.subset
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Same samples, generators for another epoch
    pub fn with_epoch(&self, epoch: u64) -> Self {
        Self {
            epoch,
            ..self.clone()
        }
    }

    /// Labels in dataset order
    pub fn labels(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Load one item, reporting failures instead of skipping them
    pub fn try_get(&self, index: usize) -> Result<TrainingItem> {
        let entry = self.entries.get(index).ok_or_else(|| {
            DatasetError::InvalidState(format!(
                "index {} out of range for {} subset of {}",
                index,
                self.subset,
                self.entries.len()
            ))
        })?;

        let img = ImageReader::open(&entry.path)?.with_guessed_format()?.decode()?;
        let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(self.seed, self.epoch, index as u64));
        let out = self.pipeline.apply(&img, &mut rng);

        Ok(TrainingItem {
            image: out.data,
            shape: out.shape,
            label: entry.label,
            path: entry.path.to_string_lossy().to_string(),
        })
    }
}

impl Dataset<TrainingItem> for SubsetDataset {
    fn get(&self, index: usize) -> Option<TrainingItem> {
        if index >= self.entries.len() {
            return None;
        }
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Failed to load {} item {}: {}", self.subset, index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A persisted split opened for training
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    dir: PathBuf,
    split: PersistedSplit,
    pipeline: AugmentationPipeline,
    class_weights: ClassWeightMap,
}

impl PreparedDataset {
    /// Open a split directory written by the pipeline
    ///
    /// The output size always follows the persisted image shape. Class weights
    /// come from `class_weights.json` when present, otherwise they are
    /// recomputed from the train labels.
    pub fn open(dir: &Path, augmentation: AugmentationConfig) -> Result<Self> {
        let split = SplitReader::read(dir)?;
        let shape = split.image_shape;

        if (augmentation.target_width, augmentation.target_height) != (shape.width, shape.height) {
            debug!(
                "Overriding augmentation size {}x{} with persisted {}x{}",
                augmentation.target_width, augmentation.target_height, shape.width, shape.height
            );
        }
        let pipeline =
            AugmentationPipeline::new(augmentation.with_target_size(shape.width, shape.height))?;

        let weights_path = dir.join(CLASS_WEIGHTS_FILE_NAME);
        let class_weights = if weights_path.is_file() {
            ClassWeightMap::load(&weights_path, &split.classes)?
        } else {
            warn!("{:?} not found, recomputing class weights", weights_path);
            compute_class_weights(&split.assignment.labels(Subset::Train), &split.classes)?
        };

        info!(
            "Opened prepared dataset {:?}: train={}, validation={}, test={}",
            dir,
            split.assignment.train.len(),
            split.assignment.validation.len(),
            split.assignment.test.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            split,
            pipeline,
            class_weights,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn classes(&self) -> &ClassList {
        &self.split.classes
    }

    pub fn image_shape(&self) -> ImageShape {
        self.split.image_shape
    }

    pub fn split(&self) -> &PersistedSplit {
        &self.split
    }

    pub fn class_weights(&self) -> &ClassWeightMap {
        &self.class_weights
    }

    /// Dataset view of one subset for the given epoch
    pub fn subset(&self, subset: Subset, epoch: u64) -> SubsetDataset {
        let pipeline = match subset {
            Subset::Train => self.pipeline.clone(),
            Subset::Validation | Subset::Test => self.pipeline.evaluation(),
        };
        SubsetDataset {
            subset,
            entries: self.split.assignment.subset(subset).to_vec(),
            pipeline,
            seed: self.split.assignment.seed,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::persist::SplitWriter;
    use crate::dataset::split::{SplitAssignment, SplitRatios};
    use crate::dataset::validator::tests::write_noise_image;

    fn prepare(dir: &Path, with_weights: bool) -> ClassList {
        let classes = ClassList::new(["healthy", "leaf_spot"]).unwrap();
        let mut entries = Vec::new();
        for i in 0..4u64 {
            let path = dir.join(format!("images/img_{}.png", i));
            write_noise_image(&path, 40, 30, i);
            entries.push(SplitEntry {
                path,
                label: (i % 2) as usize,
            });
        }

        let assignment = SplitAssignment {
            train: entries[..2].to_vec(),
            validation: vec![entries[2].clone()],
            test: vec![entries[3].clone()],
            seed: 11,
            ratios: SplitRatios::default(),
        };
        let split_dir = dir.join("split");
        SplitWriter::write(&split_dir, &assignment, &classes, ImageShape::rgb(16, 16)).unwrap();
        if with_weights {
            compute_class_weights(&assignment.labels(Subset::Train), &classes)
                .unwrap()
                .save(&split_dir.join(CLASS_WEIGHTS_FILE_NAME))
                .unwrap();
        }
        classes
    }

    #[test]
    fn test_open_and_iterate() {
        let tmp = tempfile::tempdir().unwrap();
        prepare(tmp.path(), true);
        let prepared =
            PreparedDataset::open(&tmp.path().join("split"), AugmentationConfig::medium()).unwrap();

        let train = prepared.subset(Subset::Train, 0);
        assert_eq!(train.len(), 2);
        let item = train.get(0).unwrap();
        assert_eq!(item.shape, ImageShape::rgb(16, 16));
        assert_eq!(item.image.len(), 3 * 16 * 16);
        assert!(train.get(2).is_none());

        let all: Vec<TrainingItem> = train.iter().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(prepared.class_weights().weights(), &[1.0, 1.0]);
    }

    #[test]
    fn test_items_are_reproducible_per_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        prepare(tmp.path(), true);
        let prepared =
            PreparedDataset::open(&tmp.path().join("split"), AugmentationConfig::heavy()).unwrap();

        let epoch0 = prepared.subset(Subset::Train, 0);
        let again = prepared.subset(Subset::Train, 0);
        assert_eq!(epoch0.get(1).unwrap().image, again.get(1).unwrap().image);

        // Evaluation subsets never change between epochs
        let val0 = prepared.subset(Subset::Validation, 0).get(0).unwrap();
        let val5 = prepared.subset(Subset::Validation, 5).get(0).unwrap();
        assert_eq!(val0.image, val5.image);
        assert_eq!(epoch0.with_epoch(3).epoch(), 3);
    }

    #[test]
    fn test_missing_weights_are_recomputed() {
        let tmp = tempfile::tempdir().unwrap();
        prepare(tmp.path(), false);
        let prepared =
            PreparedDataset::open(&tmp.path().join("split"), AugmentationConfig::none()).unwrap();
        assert_eq!(prepared.class_weights().weights().len(), 2);
    }

    #[test]
    fn test_unreadable_image_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        prepare(tmp.path(), true);
        std::fs::write(tmp.path().join("images/img_3.png"), b"gone").unwrap();

        let prepared =
            PreparedDataset::open(&tmp.path().join("split"), AugmentationConfig::none()).unwrap();
        let test = prepared.subset(Subset::Test, 0);
        assert_eq!(test.len(), 1);
        assert!(test.get(0).is_none());
        assert!(test.try_get(0).is_err());
    }
}
