//! Directory-per-subset export
//!
//! Materializes a split as
//!
//! ```text
//! out/
//! ├── train/<class>/...
//! ├── validation/<class>/...
//! └── test/<class>/...
//! ```
//!
//! for training code that reads class folders instead of split files.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use tracing::info;

use super::split::{SplitAssignment, Subset};
use super::ClassList;
use crate::utils::error::{DatasetError, Result};

/// Files written per subset and class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// `counts[subset][label]`, subsets in [`Subset::ALL`] order
    pub counts: Vec<Vec<usize>>,
}

impl ExportSummary {
    pub fn count(&self, subset: Subset, label: usize) -> usize {
        Subset::ALL
            .iter()
            .position(|&x| x == subset)
            .and_then(|s| self.counts.get(s))
            .and_then(|c| c.get(label))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

/// Copy every assigned image into `out/<subset>/<class>/<file name>`
///
/// Every class directory is created, even when it stays empty.
pub fn export_split_directories(
    assignment: &SplitAssignment,
    classes: &ClassList,
    out: &Path,
) -> Result<ExportSummary> {
    for subset in Subset::ALL {
        if let Some(entry) = assignment.subset(subset).iter().find(|e| e.label >= classes.len()) {
            return Err(DatasetError::InvalidLabel {
                label: entry.label,
                num_classes: classes.len(),
            });
        }
    }

    let mut counts = Vec::with_capacity(Subset::ALL.len());
    for subset in Subset::ALL {
        for (_, class_name) in classes.iter() {
            fs::create_dir_all(out.join(subset.as_str()).join(class_name))?;
        }

        assignment
            .subset(subset)
            .par_iter()
            .try_for_each(|entry| -> Result<()> {
                let file_name = entry.path.file_name().ok_or_else(|| {
                    DatasetError::InvalidState(format!("{:?} has no file name", entry.path))
                })?;
                let class_name = classes.name(entry.label).unwrap_or_default();
                let dest = out.join(subset.as_str()).join(class_name).join(file_name);
                fs::copy(&entry.path, dest)?;
                Ok(())
            })?;

        let per_class = assignment.class_counts(subset, classes.len());
        info!("Exported {} {} images", per_class.iter().sum::<usize>(), subset);
        counts.push(per_class);
    }

    Ok(ExportSummary { counts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::split::{SplitEntry, SplitRatios};
    use std::path::PathBuf;

    #[test]
    fn test_export_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("canonical");
        fs::create_dir_all(src.join("a")).unwrap();
        fs::create_dir_all(src.join("b")).unwrap();
        let file = |rel: &str| {
            let p = src.join(rel);
            fs::write(&p, rel.as_bytes()).unwrap();
            p
        };
        let entry = |path: PathBuf, label| SplitEntry { path, label };

        let assignment = SplitAssignment {
            train: vec![entry(file("a/a_00000.jpg"), 0), entry(file("b/b_00000.jpg"), 1)],
            validation: vec![entry(file("a/a_00001.jpg"), 0)],
            test: Vec::new(),
            seed: 1,
            ratios: SplitRatios::default(),
        };
        let classes = ClassList::new(["a", "b"]).unwrap();
        let out = tmp.path().join("export");

        let summary = export_split_directories(&assignment, &classes, &out).unwrap();
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.count(Subset::Train, 1), 1);
        assert_eq!(
            fs::read_to_string(out.join("validation/a/a_00001.jpg")).unwrap(),
            "a/a_00001.jpg"
        );
        assert!(out.join("test/b").is_dir());
    }

    #[test]
    fn test_export_rejects_unknown_label() {
        let tmp = tempfile::tempdir().unwrap();
        let assignment = SplitAssignment {
            train: vec![SplitEntry {
                path: PathBuf::from("x.jpg"),
                label: 3,
            }],
            validation: Vec::new(),
            test: Vec::new(),
            seed: 1,
            ratios: SplitRatios::default(),
        };
        let classes = ClassList::new(["a"]).unwrap();
        assert!(export_split_directories(&assignment, &classes, tmp.path()).is_err());
        assert!(!tmp.path().join("train").exists());
    }
}
