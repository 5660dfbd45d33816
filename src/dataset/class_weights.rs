//! Class weights for imbalanced training data
//!
//! Uses the "balanced" heuristic: `weight(c) = total / (num_classes * count(c))`
//! where `num_classes` is the number of classes that actually occur in the
//! training labels. A perfectly balanced training set gets all weights 1.0.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use super::ClassList;
use crate::utils::error::{DatasetError, Result};
use crate::utils::write_atomic;

/// File name of the persisted weights inside a split directory
pub const CLASS_WEIGHTS_FILE_NAME: &str = "class_weights.json";

/// Weight used for classes without training samples
pub const MISSING_CLASS_WEIGHT: f64 = 1.0;

/// Per-class loss weights, in class-list order
#[derive(Debug, Clone, PartialEq)]
pub struct ClassWeightMap {
    weights: Vec<f64>,
    class_names: Vec<String>,
    missing: Vec<usize>,
}

impl ClassWeightMap {
    pub fn get(&self, label: usize) -> Option<f64> {
        self.weights.get(label).copied()
    }

    pub fn get_by_name(&self, class_name: &str) -> Option<f64> {
        let label = self.class_names.iter().position(|n| n == class_name)?;
        self.get(label)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Labels of classes that had no training samples
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }

    /// Weights as `f32`, ready to build a loss-weight tensor
    pub fn as_f32_vec(&self) -> Vec<f32> {
        self.weights.iter().map(|&w| w as f32).collect()
    }

    /// Weights keyed by the class index as a string
    pub fn to_index_map(&self) -> BTreeMap<String, f64> {
        self.weights
            .iter()
            .enumerate()
            .map(|(i, &w)| (i.to_string(), w))
            .collect()
    }

    /// Save as `{"0": 0.625, "1": 2.5}`
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_index_map())?;
        write_atomic(path, json.as_bytes())
    }

    /// Load weights saved by [`ClassWeightMap::save`]
    ///
    /// Every class of `classes` must have an entry with a positive weight.
    pub fn load(path: &Path, classes: &ClassList) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let map: BTreeMap<String, f64> = serde_json::from_str(&json)?;

        let mut weights = Vec::with_capacity(classes.len());
        for (label, name) in classes.iter() {
            let weight = map.get(&label.to_string()).copied().ok_or_else(|| {
                DatasetError::Serialization(format!(
                    "{:?} has no weight for class {} ({})",
                    path, label, name
                ))
            })?;
            if !(weight.is_finite() && weight > 0.0) {
                return Err(DatasetError::Serialization(format!(
                    "Invalid weight {} for class {}",
                    weight, name
                )));
            }
            weights.push(weight);
        }
        if map.len() != classes.len() {
            return Err(DatasetError::Serialization(format!(
                "{:?} has {} weights for {} classes",
                path,
                map.len(),
                classes.len()
            )));
        }

        Ok(Self {
            weights,
            class_names: classes.names().to_vec(),
            missing: Vec::new(),
        })
    }
}

impl std::fmt::Display for ClassWeightMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Class weights:")?;
        for (label, (name, weight)) in self.class_names.iter().zip(&self.weights).enumerate() {
            let note = if self.missing.contains(&label) {
                " (no training samples)"
            } else {
                ""
            };
            writeln!(f, "  {:20} {:.4}{}", name, weight, note)?;
        }
        Ok(())
    }
}

/// Compute balanced class weights from the training labels
pub fn compute_class_weights(
    train_labels: &[usize],
    classes: &ClassList,
) -> Result<ClassWeightMap> {
    if train_labels.is_empty() {
        return Err(DatasetError::EmptyTrainingSet);
    }

    let mut counts = vec![0usize; classes.len()];
    for &label in train_labels {
        let count = counts.get_mut(label).ok_or(DatasetError::InvalidLabel {
            label,
            num_classes: classes.len(),
        })?;
        *count += 1;
    }

    let total = train_labels.len() as f64;
    let present = counts.iter().filter(|&&c| c > 0).count() as f64;

    let mut missing = Vec::new();
    let weights = counts
        .iter()
        .enumerate()
        .map(|(label, &count)| {
            if count == 0 {
                warn!(
                    "Class {} has no training samples, using weight {}",
                    classes.name(label).unwrap_or("?"),
                    MISSING_CLASS_WEIGHT
                );
                missing.push(label);
                MISSING_CLASS_WEIGHT
            } else {
                total / (present * count as f64)
            }
        })
        .collect();

    let map = ClassWeightMap {
        weights,
        class_names: classes.names().to_vec(),
        missing,
    };
    info!("Computed class weights for {} classes", classes.len());
    Ok(map)
}
