//! Stratified train/validation/test splitting
//!
//! Every class is split independently in two stages: first the test share is
//! cut off, then validation is cut from the remainder with the ratio
//! `validation / (1 - test)` so it ends up as the requested fraction of the
//! whole class. Shuffling uses a seeded `ChaCha8Rng`, so the same records in
//! the same order with the same seed always give the same assignment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::organizer::parse_canonical_index;
use super::{list_images, ClassList};
use crate::utils::error::{DatasetError, Result};
use crate::utils::format_percentage;

/// Tolerance on the ratio sum
const RATIO_SUM_TOLERANCE: f64 = 1e-6;

/// Slack added before rounding so that `2.4999999999` from float noise
/// still rounds as the exact `2.5` it stands for
const ROUNDING_EPSILON: f64 = 1e-9;

/// One of the three split subsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Validation,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Validation, Subset::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Validation => "validation",
            Subset::Test => "test",
        }
    }
}

impl std::fmt::Display for Subset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Subset {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Subset::Train),
            "validation" | "val" => Ok(Subset::Validation),
            "test" => Ok(Subset::Test),
            other => Err(DatasetError::Config(format!("Unknown subset '{}'", other))),
        }
    }
}

/// Fractions of each class assigned to each subset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.6,
            validation: 0.2,
            test: 0.2,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, validation: f64, test: f64) -> Result<Self> {
        let ratios = Self {
            train,
            validation,
            test,
        };
        ratios.validate()?;
        Ok(ratios)
    }

    /// Ratios must be finite, within [0, 1] and sum to 1
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| DatasetError::InvalidRatios {
            train: self.train,
            validation: self.validation,
            test: self.test,
            reason,
        };

        for (name, value) in [
            ("train", self.train),
            ("validation", self.validation),
            ("test", self.test),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{} ratio is not finite", name)));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} ratio {} is outside [0, 1]", name, value)));
            }
        }

        let sum = self.train + self.validation + self.test;
        if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(invalid(format!("ratios sum to {}, expected 1.0", sum)));
        }
        Ok(())
    }

    /// Validation fraction of what is left after the test cut
    fn adjusted_validation(&self) -> f64 {
        let remainder = 1.0 - self.test;
        if remainder <= ROUNDING_EPSILON {
            0.0
        } else {
            (self.validation / remainder).min(1.0)
        }
    }
}

/// Per-class subset sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl SplitCounts {
    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }

    pub fn get(&self, subset: Subset) -> usize {
        match subset {
            Subset::Train => self.train,
            Subset::Validation => self.validation,
            Subset::Test => self.test,
        }
    }
}

fn round_half_up(x: f64) -> usize {
    (x + 0.5 + ROUNDING_EPSILON).floor().max(0.0) as usize
}

/// Subset sizes for a class of `n` images
///
/// Test is `round_half_up(n * test)`, validation is
/// `round_half_up(rest * validation / (1 - test))` and train takes what is
/// left. When that leaves train empty although its ratio is positive, one
/// sample is moved back to train, from validation if it has any, else from
/// test. The three counts always add up to `n`.
pub fn split_counts(n: usize, ratios: &SplitRatios) -> SplitCounts {
    let test = round_half_up(n as f64 * ratios.test).min(n);
    let rest = n - test;
    let validation = round_half_up(rest as f64 * ratios.adjusted_validation()).min(rest);
    let mut counts = SplitCounts {
        train: rest - validation,
        validation,
        test,
    };

    if counts.train == 0 && ratios.train > 0.0 && n > 0 {
        if counts.validation > 0 {
            counts.validation -= 1;
        } else {
            counts.test -= 1;
        }
        counts.train = 1;
    }
    counts
}

/// An image in the canonical tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    /// Label index in the class list
    pub label: usize,
    /// Per-class index taken from the canonical file name
    pub index: usize,
}

/// List every canonical image in class-list order, then by index
///
/// Files that do not follow the canonical naming are skipped with a warning.
pub fn scan_canonical(canonical_root: &Path, classes: &ClassList) -> Result<Vec<ImageRecord>> {
    if !canonical_root.is_dir() {
        return Err(DatasetError::SourceNotFound(canonical_root.to_path_buf()));
    }

    let mut records = Vec::new();
    for (label, class_name) in classes.iter() {
        let class_dir = canonical_root.join(class_name);
        if !class_dir.is_dir() {
            debug!("No canonical directory for {}", class_name);
            continue;
        }

        let mut class_records = Vec::new();
        for path in list_images(&class_dir)? {
            match parse_canonical_index(class_name, &path) {
                Some(index) => class_records.push(ImageRecord { path, label, index }),
                None => warn!("Skipping non-canonical file {:?}", path),
            }
        }
        class_records.sort_by_key(|r| r.index);
        records.extend(class_records);
    }
    Ok(records)
}

/// A path with its label, as stored in a split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub path: PathBuf,
    pub label: usize,
}

/// Result of a stratified split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAssignment {
    pub train: Vec<SplitEntry>,
    pub validation: Vec<SplitEntry>,
    pub test: Vec<SplitEntry>,
    pub seed: u64,
    pub ratios: SplitRatios,
}

impl SplitAssignment {
    pub fn subset(&self, subset: Subset) -> &[SplitEntry] {
        match subset {
            Subset::Train => &self.train,
            Subset::Validation => &self.validation,
            Subset::Test => &self.test,
        }
    }

    /// Labels of one subset, in subset order
    pub fn labels(&self, subset: Subset) -> Vec<usize> {
        self.subset(subset).iter().map(|e| e.label).collect()
    }

    /// Paths of one subset, in subset order
    pub fn paths(&self, subset: Subset) -> Vec<&Path> {
        self.subset(subset).iter().map(|e| e.path.as_path()).collect()
    }

    /// Which subset an image was assigned to
    pub fn assignment_of(&self, path: &Path) -> Option<Subset> {
        Subset::ALL
            .into_iter()
            .find(|&s| self.subset(s).iter().any(|e| e.path == path))
    }

    /// Total number of assigned images
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-class counts for one subset
    pub fn class_counts(&self, subset: Subset, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for entry in self.subset(subset) {
            if let Some(c) = counts.get_mut(entry.label) {
                *c += 1;
            }
        }
        counts
    }
}

impl std::fmt::Display for SplitAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.len();
        writeln!(f, "Split (seed {}):", self.seed)?;
        for subset in Subset::ALL {
            let n = self.subset(subset).len();
            writeln!(f, "  {:10} {:6} ({})", subset, n, format_percentage(n, total))?;
        }
        Ok(())
    }
}

/// Splitter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub ratios: SplitRatios,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            ratios: SplitRatios::default(),
            seed: 42,
        }
    }
}

/// Class-stratified splitter
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    config: SplitConfig,
}

impl StratifiedSplitter {
    /// Create a splitter, rejecting invalid ratios up front
    pub fn new(config: SplitConfig) -> Result<Self> {
        config.ratios.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Split the records, class by class in ascending label order
    pub fn split(&self, records: &[ImageRecord]) -> Result<SplitAssignment> {
        let ratios = &self.config.ratios;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut by_class: BTreeMap<usize, Vec<&ImageRecord>> = BTreeMap::new();
        for record in records {
            by_class.entry(record.label).or_default().push(record);
        }

        let mut assignment = SplitAssignment {
            train: Vec::new(),
            validation: Vec::new(),
            test: Vec::new(),
            seed: self.config.seed,
            ratios: *ratios,
        };

        for (label, mut class_records) in by_class {
            let counts = split_counts(class_records.len(), ratios);

            // Stage 1: test vs. rest
            class_records.shuffle(&mut rng);
            let mut rest = class_records.split_off(counts.test);
            let test = class_records;

            // Stage 2: validation vs. train
            rest.shuffle(&mut rng);
            let train = rest.split_off(counts.validation);
            let validation = rest;

            debug!(
                "Class {}: train={}, validation={}, test={}",
                label,
                train.len(),
                validation.len(),
                test.len()
            );

            let entry = |r: &&ImageRecord| SplitEntry {
                path: r.path.clone(),
                label: r.label,
            };
            assignment.train.extend(train.iter().map(entry));
            assignment.validation.extend(validation.iter().map(entry));
            assignment.test.extend(test.iter().map(entry));
        }

        assignment.train.shuffle(&mut rng);
        assignment.validation.shuffle(&mut rng);
        assignment.test.shuffle(&mut rng);

        info!(
            "Split {} images: train={}, validation={}, test={}",
            assignment.len(),
            assignment.train.len(),
            assignment.validation.len(),
            assignment.test.len()
        );

        Ok(assignment)
    }
}
