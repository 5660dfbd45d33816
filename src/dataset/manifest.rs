//! Dataset manifest: the census of a canonical tree
//!
//! Written to `dataset_info.json` after organization and treated as read-only
//! afterwards. Also hosts the "is this dataset big enough" heuristics used in
//! reports.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{list_images, ClassList};
use crate::utils::error::Result;
use crate::utils::{format_percentage, write_atomic};

/// File name of the manifest inside the canonical root
pub const MANIFEST_FILE_NAME: &str = "dataset_info.json";

/// Per-class image count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCount {
    pub class_name: String,
    pub count: usize,
}

/// Census of the canonical tree, in class-list order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub classes: Vec<ClassCount>,
    pub total_images: usize,
    /// RFC 3339 timestamp of when the census was taken
    pub generated_at: String,
}

impl DatasetManifest {
    /// Build a manifest from counts given in class-list order
    pub fn from_counts(classes: &ClassList, counts: &[usize]) -> Self {
        let classes: Vec<ClassCount> = classes
            .iter()
            .map(|(label, name)| ClassCount {
                class_name: name.to_string(),
                count: counts.get(label).copied().unwrap_or(0),
            })
            .collect();
        let total_images = classes.iter().map(|c| c.count).sum();

        Self {
            classes,
            total_images,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Count the images currently present in a canonical tree
    ///
    /// Missing class directories count as zero.
    pub fn census(canonical_root: &Path, classes: &ClassList) -> Result<Self> {
        let mut counts = Vec::with_capacity(classes.len());
        for (_, name) in classes.iter() {
            let dir = canonical_root.join(name);
            let count = if dir.is_dir() {
                list_images(&dir)?.len()
            } else {
                0
            };
            counts.push(count);
        }
        Ok(Self::from_counts(classes, &counts))
    }

    /// Image count for one class (0 for unknown classes)
    pub fn count(&self, class_name: &str) -> usize {
        self.classes
            .iter()
            .find(|c| c.class_name == class_name)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Counts in class-list order
    pub fn counts(&self) -> Vec<usize> {
        self.classes.iter().map(|c| c.count).collect()
    }

    /// Largest class size divided by smallest non-empty class size
    pub fn imbalance_ratio(&self) -> Option<f64> {
        let non_empty = self.classes.iter().map(|c| c.count).filter(|&c| c > 0);
        let min = non_empty.clone().min()?;
        let max = non_empty.max()?;
        Some(max as f64 / min as f64)
    }

    /// Size assessment of the whole dataset
    pub fn size_status(&self) -> DatasetSizeStatus {
        DatasetSizeStatus::from_total(self.total_images)
    }

    /// Size assessment per class, in class-list order
    pub fn class_size_status(&self) -> Vec<(&str, ClassSizeStatus)> {
        self.classes
            .iter()
            .map(|c| (c.class_name.as_str(), ClassSizeStatus::from_count(c.count)))
            .collect()
    }

    /// Save manifest to a JSON file (atomically)
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    /// Load manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl std::fmt::Display for DatasetManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dataset Manifest:")?;
        for class in &self.classes {
            writeln!(
                f,
                "  {:20} {:5} images ({}) {}",
                class.class_name,
                class.count,
                format_percentage(class.count, self.total_images),
                ClassSizeStatus::from_count(class.count)
            )?;
        }
        writeln!(f, "  Total: {} images ({})", self.total_images, self.size_status())
    }
}

/// How well a single class is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassSizeStatus {
    Empty,
    /// Fewer than 50 images
    NeedsMore,
    /// 50 to 99 images
    Good,
    /// 100 images or more
    Excellent,
}

impl ClassSizeStatus {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => ClassSizeStatus::Empty,
            1..=49 => ClassSizeStatus::NeedsMore,
            50..=99 => ClassSizeStatus::Good,
            _ => ClassSizeStatus::Excellent,
        }
    }
}

impl std::fmt::Display for ClassSizeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassSizeStatus::Empty => write!(f, "no images"),
            ClassSizeStatus::NeedsMore => write!(f, "needs more (target: 100+)"),
            ClassSizeStatus::Good => write!(f, "good"),
            ClassSizeStatus::Excellent => write!(f, "excellent"),
        }
    }
}

/// How large the whole dataset is relative to training needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetSizeStatus {
    Empty,
    /// Fewer than 100 images
    VerySmall,
    /// 100 to 499 images
    Small,
    /// 500 images or more
    Adequate,
}

impl DatasetSizeStatus {
    pub fn from_total(total: usize) -> Self {
        match total {
            0 => DatasetSizeStatus::Empty,
            1..=99 => DatasetSizeStatus::VerySmall,
            100..=499 => DatasetSizeStatus::Small,
            _ => DatasetSizeStatus::Adequate,
        }
    }
}

impl std::fmt::Display for DatasetSizeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSizeStatus::Empty => write!(f, "empty"),
            DatasetSizeStatus::VerySmall => write!(f, "very small"),
            DatasetSizeStatus::Small => write!(f, "small"),
            DatasetSizeStatus::Adequate => write!(f, "adequate for training"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> ClassList {
        ClassList::new(["healthy", "leaf_spot", "soft_rot"]).unwrap()
    }

    #[test]
    fn test_from_counts() {
        let manifest = DatasetManifest::from_counts(&classes(), &[10, 3, 0]);
        assert_eq!(manifest.total_images, 13);
        assert_eq!(manifest.count("healthy"), 10);
        assert_eq!(manifest.count("soft_rot"), 0);
        assert_eq!(manifest.count("unknown"), 0);
        assert_eq!(manifest.counts(), vec![10, 3, 0]);
    }

    #[test]
    fn test_imbalance_ratio_ignores_empty() {
        let manifest = DatasetManifest::from_counts(&classes(), &[12, 3, 0]);
        assert_eq!(manifest.imbalance_ratio(), Some(4.0));

        let empty = DatasetManifest::from_counts(&classes(), &[0, 0, 0]);
        assert_eq!(empty.imbalance_ratio(), None);
    }

    #[test]
    fn test_size_heuristics() {
        assert_eq!(ClassSizeStatus::from_count(0), ClassSizeStatus::Empty);
        assert_eq!(ClassSizeStatus::from_count(49), ClassSizeStatus::NeedsMore);
        assert_eq!(ClassSizeStatus::from_count(50), ClassSizeStatus::Good);
        assert_eq!(ClassSizeStatus::from_count(100), ClassSizeStatus::Excellent);

        assert_eq!(DatasetSizeStatus::from_total(0), DatasetSizeStatus::Empty);
        assert_eq!(DatasetSizeStatus::from_total(99), DatasetSizeStatus::VerySmall);
        assert_eq!(DatasetSizeStatus::from_total(499), DatasetSizeStatus::Small);
        assert_eq!(DatasetSizeStatus::from_total(500), DatasetSizeStatus::Adequate);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let manifest = DatasetManifest::from_counts(&classes(), &[1, 2, 3]);

        manifest.save(&path).unwrap();
        let loaded = DatasetManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_census_counts_only_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("healthy")).unwrap();
        std::fs::write(root.join("healthy/healthy_00000.jpg"), b"x").unwrap();
        std::fs::write(root.join("healthy/healthy_00001.PNG"), b"x").unwrap();
        std::fs::write(root.join("healthy/notes.txt"), b"x").unwrap();

        let manifest = DatasetManifest::census(root, &classes()).unwrap();
        assert_eq!(manifest.counts(), vec![2, 0, 0]);
    }
}
