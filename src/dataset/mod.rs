//! Dataset module for ginger disease image data
//!
//! This module provides functionality for:
//! - Validating raw image files
//! - Organizing a raw tree into the canonical per-class layout
//! - Stratified train/validation/test splitting
//! - Class weight computation for imbalanced data
//! - Data augmentation
//! - Persisting splits and serving them to a training loop
//!
//! ## Canonical Layout
//!
//! ```text
//! canonical_root/
//! ├── dataset_info.json
//! ├── healthy/
//! │   ├── healthy_00000.jpg
//! │   └── healthy_00001.png
//! ├── bacterial_wilt/
//! │   └── ...
//! └── ...
//! ```

pub mod augmentation;
pub mod class_weights;
pub mod export;
pub mod loader;
pub mod manifest;
pub mod organizer;
pub mod persist;
pub mod split;
pub mod validator;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::utils::error::{DatasetError, Result};

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, AugmentationPipeline, AugmentedImage};
pub use class_weights::{compute_class_weights, ClassWeightMap};
pub use loader::{PreparedDataset, SubsetDataset, TrainingItem};
pub use manifest::DatasetManifest;
pub use organizer::{DatasetOrganizer, OrganizeReport};
pub use persist::{PersistedSplit, SplitReader, SplitWriter};
pub use split::{
    split_counts, ImageRecord, SplitAssignment, SplitRatios, StratifiedSplitter, Subset,
};
pub use validator::{ImageValidator, InvalidReason, Validation, ValidationReport};

/// Disease classes of the reference configuration, in label-index order
pub const DEFAULT_CLASS_NAMES: [&str; 7] = [
    "healthy",
    "bacterial_wilt",
    "rhizome_rot",
    "leaf_spot",
    "soft_rot",
    "yellow_disease",
    "root_knot_nematode",
];

/// Default model input edge length
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Extensions accepted when scanning raw and canonical trees (lower-case)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "tiff"];

/// Check whether a path has one of the accepted image extensions
pub fn has_image_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// List the image files directly inside `dir`, sorted by file name
///
/// Sorting gives every later stage a stable input order, which the
/// splitter's reproducibility depends on.
pub fn list_images(dir: &std::path::Path) -> Result<Vec<std::path::PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            DatasetError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

/// Ordered list of class names
///
/// The position of a name is its label index. Two pipelines built from equal
/// lists always agree on label indices, which is what keeps persisted splits
/// valid across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassList {
    names: Vec<String>,
}

impl ClassList {
    /// Build a class list
    ///
    /// Every name becomes a directory under the dataset root, so empty,
    /// duplicate, `.`/`..` and separator-bearing names are rejected.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if names.is_empty() {
            return Err(DatasetError::Config("Class list must not be empty".to_string()));
        }

        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DatasetError::Config(format!("Class {} has an empty name", i)));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(DatasetError::Config(format!(
                    "Class name '{}' must not contain path separators",
                    name
                )));
            }
            if name == "." || name == ".." {
                return Err(DatasetError::Config(format!(
                    "Class name '{}' does not name a directory inside the dataset root",
                    name
                )));
            }
            if names[..i].contains(name) {
                return Err(DatasetError::Config(format!("Duplicate class name '{}'", name)));
            }
        }

        Ok(Self { names })
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed list, kept for API symmetry
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the class name for a given label index
    pub fn name(&self, label: usize) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    /// Get the label index for a given class name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Like [`ClassList::index_of`] but fails with `UnknownClass`
    pub fn require_index(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| DatasetError::UnknownClass(name.to_string()))
    }

    /// Iterate over `(label, name)` pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }

    /// Class names in label order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for ClassList {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for ClassList {
    type Error = DatasetError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<ClassList> for Vec<String> {
    fn from(list: ClassList) -> Self {
        list.names
    }
}

/// Shape of a prepared image tensor (channels-first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl ImageShape {
    /// RGB shape with the given spatial size
    pub fn rgb(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }

    /// Number of scalar values in one image
    pub fn num_values(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::rgb(DEFAULT_IMAGE_SIZE, DEFAULT_IMAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_class_list() {
        let classes = ClassList::default();
        assert_eq!(classes.len(), 7);
        assert_eq!(classes.name(0), Some("healthy"));
        assert_eq!(classes.name(6), Some("root_knot_nematode"));
        assert_eq!(classes.name(7), None);
    }

    #[test]
    fn test_class_index() {
        let classes = ClassList::default();
        assert_eq!(classes.index_of("leaf_spot"), Some(3));
        assert_eq!(classes.index_of("Leaf_Spot"), None);
        assert!(matches!(
            classes.require_index("unknown"),
            Err(DatasetError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_class_list_rejects_duplicates_and_empty() {
        assert!(ClassList::new(Vec::<String>::new()).is_err());
        assert!(ClassList::new(["a", "b", "a"]).is_err());
        assert!(ClassList::new(["a", " "]).is_err());
        assert!(ClassList::new(["a/b"]).is_err());
    }

    #[test]
    fn test_class_list_rejects_relative_directory_names() {
        for name in [".", ".."] {
            assert!(matches!(ClassList::new(["healthy", name]), Err(DatasetError::Config(_))));
        }
        assert!(serde_json::from_str::<ClassList>(r#"["healthy", ".."]"#).is_err());
        // Dots inside a name are fine
        assert!(ClassList::new(["leaf.spot", "..rot"]).is_ok());
    }

    #[test]
    fn test_class_list_serde_validates() {
        let json = serde_json::to_string(&ClassList::new(["x", "y"]).unwrap()).unwrap();
        assert_eq!(json, r#"["x","y"]"#);

        let parsed: ClassList = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.index_of("y"), Some(1));

        assert!(serde_json::from_str::<ClassList>(r#"["x","x"]"#).is_err());
    }

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension(std::path::Path::new("a/b.JPG")));
        assert!(has_image_extension(std::path::Path::new("leaf.tiff")));
        assert!(!has_image_extension(std::path::Path::new("notes.txt")));
        assert!(!has_image_extension(std::path::Path::new("noext")));
    }

    #[test]
    fn test_image_shape() {
        let shape = ImageShape::default();
        assert_eq!(shape.num_values(), 3 * 224 * 224);
    }
}
