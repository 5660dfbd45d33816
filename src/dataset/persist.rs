//! Persisted split files
//!
//! Each subset is stored as its own JSON document (`train.json`,
//! `validation.json`, `test.json`) holding ordered image paths, the parallel
//! label array and metadata. Reading them back gives the exact assignment that
//! was written, without rescanning the canonical tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::split::{SplitAssignment, SplitEntry, SplitRatios, Subset};
use super::{ClassList, ImageShape};
use crate::utils::error::{DatasetError, Result};
use crate::utils::write_atomic;

/// Metadata stored alongside each subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetMetadata {
    pub subset: Subset,
    pub sample_count: usize,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub image_shape: ImageShape,
    pub seed: u64,
    pub ratios: SplitRatios,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// On-disk form of one subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetRecord {
    pub metadata: SubsetMetadata,
    pub paths: Vec<PathBuf>,
    pub labels: Vec<usize>,
}

impl SubsetRecord {
    /// Check internal consistency, reporting problems as `CorruptManifest`
    fn check(&self, subset: Subset) -> Result<()> {
        let corrupt = |reason: String| DatasetError::CorruptManifest {
            subset: subset.to_string(),
            reason,
        };
        let meta = &self.metadata;

        if meta.subset != subset {
            return Err(corrupt(format!("file holds the {} subset", meta.subset)));
        }
        if meta.sample_count != self.paths.len() || meta.sample_count != self.labels.len() {
            return Err(corrupt(format!(
                "metadata says {} samples but found {} paths and {} labels",
                meta.sample_count,
                self.paths.len(),
                self.labels.len()
            )));
        }
        if meta.num_classes != meta.class_names.len() {
            return Err(corrupt(format!(
                "num_classes {} does not match {} class names",
                meta.num_classes,
                meta.class_names.len()
            )));
        }
        if let Some(&label) = self.labels.iter().find(|&&l| l >= meta.num_classes) {
            return Err(corrupt(format!(
                "label {} outside {} classes",
                label, meta.num_classes
            )));
        }
        Ok(())
    }
}

/// Fail with `CorruptManifest` when an image is listed in two subsets
fn check_disjoint(records: &[&SubsetRecord]) -> Result<()> {
    let mut owner: HashMap<&Path, Subset> = HashMap::new();
    for record in records {
        let subset = record.metadata.subset;
        for path in &record.paths {
            if let Some(first) = owner.insert(path.as_path(), subset) {
                return Err(DatasetError::CorruptManifest {
                    subset: subset.to_string(),
                    reason: format!("{:?} is also listed in the {} subset", path, first),
                });
            }
        }
    }
    Ok(())
}

/// File name used for a subset
pub fn subset_file_name(subset: Subset) -> String {
    format!("{}.json", subset.as_str())
}

/// Writes a split to a directory
pub struct SplitWriter;

impl SplitWriter {
    /// Write all three subsets, each file atomically
    pub fn write(
        dir: &Path,
        assignment: &SplitAssignment,
        classes: &ClassList,
        image_shape: ImageShape,
    ) -> Result<()> {
        let unknown = Subset::ALL
            .iter()
            .flat_map(|&s| assignment.subset(s))
            .find(|e| e.label >= classes.len());
        if let Some(entry) = unknown {
            return Err(DatasetError::InvalidLabel {
                label: entry.label,
                num_classes: classes.len(),
            });
        }

        std::fs::create_dir_all(dir)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        for subset in Subset::ALL {
            let entries = assignment.subset(subset);
            let record = SubsetRecord {
                metadata: SubsetMetadata {
                    subset,
                    sample_count: entries.len(),
                    num_classes: classes.len(),
                    class_names: classes.names().to_vec(),
                    image_shape,
                    seed: assignment.seed,
                    ratios: assignment.ratios,
                    created_at: created_at.clone(),
                },
                paths: entries.iter().map(|e| e.path.clone()).collect(),
                labels: entries.iter().map(|e| e.label).collect(),
            };

            let path = dir.join(subset_file_name(subset));
            let json = serde_json::to_string_pretty(&record)?;
            write_atomic(&path, json.as_bytes())?;
            info!("Saved {} split ({} samples) to {:?}", subset, entries.len(), path);
        }
        Ok(())
    }
}

/// A split loaded back from disk
#[derive(Debug, Clone)]
pub struct PersistedSplit {
    pub assignment: SplitAssignment,
    pub classes: ClassList,
    pub image_shape: ImageShape,
    pub created_at: String,
}

/// Reads split directories written by [`SplitWriter`]
pub struct SplitReader;

impl SplitReader {
    /// Read and validate one subset file
    pub fn read_subset(dir: &Path, subset: Subset) -> Result<SubsetRecord> {
        let path = dir.join(subset_file_name(subset));
        let json = std::fs::read_to_string(&path)?;
        let record: SubsetRecord =
            serde_json::from_str(&json).map_err(|e| DatasetError::CorruptManifest {
                subset: subset.to_string(),
                reason: e.to_string(),
            })?;
        record.check(subset)?;
        Ok(record)
    }

    /// Read all three subsets
    ///
    /// The files must come from the same write: equal creation time, classes,
    /// seed, ratios and shape. No image may appear in more than one subset.
    pub fn read(dir: &Path) -> Result<PersistedSplit> {
        let train = Self::read_subset(dir, Subset::Train)?;
        let validation = Self::read_subset(dir, Subset::Validation)?;
        let test = Self::read_subset(dir, Subset::Test)?;

        for other in [&validation, &test] {
            let (a, b) = (&train.metadata, &other.metadata);
            let field = if a.created_at != b.created_at {
                Some("created_at")
            } else if a.class_names != b.class_names {
                Some("class_names")
            } else if a.seed != b.seed {
                Some("seed")
            } else if a.ratios != b.ratios {
                Some("ratios")
            } else if a.image_shape != b.image_shape {
                Some("image_shape")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(DatasetError::CorruptManifest {
                    subset: b.subset.to_string(),
                    reason: format!("{} disagrees with the train subset", field),
                });
            }
        }

        check_disjoint(&[&train, &validation, &test])?;

        let classes = ClassList::new(train.metadata.class_names.clone()).map_err(|e| {
            DatasetError::CorruptManifest {
                subset: Subset::Train.to_string(),
                reason: e.to_string(),
            }
        })?;
        let image_shape = train.metadata.image_shape;
        let created_at = train.metadata.created_at.clone();
        let seed = train.metadata.seed;
        let ratios = train.metadata.ratios;

        let entries = |record: SubsetRecord| -> Vec<SplitEntry> {
            record
                .paths
                .into_iter()
                .zip(record.labels)
                .map(|(path, label)| SplitEntry { path, label })
                .collect()
        };

        Ok(PersistedSplit {
            assignment: SplitAssignment {
                train: entries(train),
                validation: entries(validation),
                test: entries(test),
                seed,
                ratios,
            },
            classes,
            image_shape,
            created_at,
        })
    }

    /// Whether all three subset files exist
    pub fn exists(dir: &Path) -> bool {
        Subset::ALL
            .iter()
            .all(|&s| dir.join(subset_file_name(s)).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_assignment() -> SplitAssignment {
        let entry = |p: &str, label| SplitEntry {
            path: PathBuf::from(p),
            label,
        };
        SplitAssignment {
            train: vec![entry("a/a_00000.jpg", 0), entry("b/b_00000.jpg", 1)],
            validation: vec![entry("a/a_00001.jpg", 0)],
            test: vec![entry("b/b_00001.jpg", 1)],
            seed: 42,
            ratios: SplitRatios::default(),
        }
    }

    fn classes() -> ClassList {
        ClassList::new(["a", "b"]).unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let assignment = sample_assignment();
        SplitWriter::write(dir.path(), &assignment, &classes(), ImageShape::default()).unwrap();

        assert!(SplitReader::exists(dir.path()));
        let loaded = SplitReader::read(dir.path()).unwrap();
        assert_eq!(loaded.assignment, assignment);
        assert_eq!(loaded.classes, classes());
        assert_eq!(loaded.image_shape, ImageShape::default());
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        SplitWriter::write(dir.path(), &sample_assignment(), &classes(), ImageShape::rgb(64, 64))
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("train.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json["metadata"]["sample_count"], 2);
        assert_eq!(json["metadata"]["image_shape"]["height"], 64);
        assert_eq!(json["labels"], serde_json::json!([0, 1]));
        assert_eq!(json["paths"][1], "b/b_00000.jpg");
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        SplitWriter::write(dir.path(), &sample_assignment(), &classes(), ImageShape::default())
            .unwrap();

        let path = dir.path().join("validation.json");
        let mut record: SubsetRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        record.metadata.sample_count = 5;
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        match SplitReader::read(dir.path()) {
            Err(DatasetError::CorruptManifest { subset, .. }) => assert_eq!(subset, "validation"),
            other => panic!("expected CorruptManifest, got {:?}", other),
        }
    }

    #[test]
    fn test_label_out_of_range_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        SplitWriter::write(dir.path(), &sample_assignment(), &classes(), ImageShape::default())
            .unwrap();

        let path = dir.path().join("test.json");
        let mut record: SubsetRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        record.labels[0] = 9;
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        assert!(matches!(
            SplitReader::read_subset(dir.path(), Subset::Test),
            Err(DatasetError::CorruptManifest { .. })
        ));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train.json"), "{ not json").unwrap();
        assert!(matches!(
            SplitReader::read_subset(dir.path(), Subset::Train),
            Err(DatasetError::CorruptManifest { .. })
        ));
    }

    fn load_record(path: &Path) -> SubsetRecord {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn store_record(path: &Path, record: &SubsetRecord) {
        std::fs::write(path, serde_json::to_string(record).unwrap()).unwrap();
    }

    #[test]
    fn test_files_from_two_writes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let first = sample_assignment();
        SplitWriter::write(dir.path(), &first, &classes(), ImageShape::default()).unwrap();
        let old_validation = std::fs::read(dir.path().join("validation.json")).unwrap();

        // Same seed, different membership: the old validation image moves to train
        let mut second = sample_assignment();
        std::mem::swap(&mut second.train[0], &mut second.validation[0]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        SplitWriter::write(dir.path(), &second, &classes(), ImageShape::default()).unwrap();

        // Interrupted rewrite: validation.json still holds the first split
        std::fs::write(dir.path().join("validation.json"), old_validation).unwrap();

        match SplitReader::read(dir.path()) {
            Err(DatasetError::CorruptManifest { subset, reason }) => {
                assert_eq!(subset, "validation");
                assert!(reason.contains("created_at"), "{}", reason);
            }
            other => panic!("expected CorruptManifest, got {:?}", other),
        }
    }

    #[test]
    fn test_ratio_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        SplitWriter::write(dir.path(), &sample_assignment(), &classes(), ImageShape::default())
            .unwrap();

        let path = dir.path().join("test.json");
        let mut record = load_record(&path);
        record.metadata.ratios = SplitRatios::new(0.7, 0.15, 0.15).unwrap();
        store_record(&path, &record);

        match SplitReader::read(dir.path()) {
            Err(DatasetError::CorruptManifest { subset, reason }) => {
                assert_eq!(subset, "test");
                assert!(reason.contains("ratios"), "{}", reason);
            }
            other => panic!("expected CorruptManifest, got {:?}", other),
        }
    }

    #[test]
    fn test_image_in_two_subsets_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        SplitWriter::write(dir.path(), &sample_assignment(), &classes(), ImageShape::default())
            .unwrap();

        // Metadata stays consistent; only the membership overlaps
        let path = dir.path().join("validation.json");
        let mut record = load_record(&path);
        record.paths[0] = PathBuf::from("b/b_00000.jpg");
        store_record(&path, &record);

        match SplitReader::read(dir.path()) {
            Err(DatasetError::CorruptManifest { subset, reason }) => {
                assert_eq!(subset, "validation");
                assert!(reason.contains("train"), "{}", reason);
            }
            other => panic!("expected CorruptManifest, got {:?}", other),
        }
    }

    #[test]
    fn test_writer_rejects_unknown_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut assignment = sample_assignment();
        assignment.test[0].label = 7;
        assert!(matches!(
            SplitWriter::write(dir.path(), &assignment, &classes(), ImageShape::default()),
            Err(DatasetError::InvalidLabel { label: 7, .. })
        ));
    }
}
