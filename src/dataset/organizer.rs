//! Dataset Organizer
//!
//! Copies validated images from a raw source tree into the canonical
//! per-class layout with deterministic names:
//!
//! ```text
//! <canonical>/<class>/<class>_<00000>.<ext>
//! ```
//!
//! Indices continue after the highest index already present, so repeated runs
//! append instead of overwriting. Files are copied atomically (temporary file
//! in the destination directory, then a no-clobber rename), so an interrupted
//! run never leaves a partial file under a canonical name.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::manifest::{DatasetManifest, MANIFEST_FILE_NAME};
use super::split::ImageRecord;
use super::validator::{ImageValidator, Validation, ValidationReport};
use super::{list_images, ClassList};
use crate::utils::error::{DatasetError, Result};

/// Organizer behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Number of digits in the zero-padded file index
    pub index_width: usize,
    /// Draw a progress bar while copying
    pub show_progress: bool,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            index_width: 5,
            show_progress: false,
        }
    }
}

/// Result of an organize (or add-images) run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeReport {
    /// Census of the canonical tree after the run
    pub manifest: DatasetManifest,
    /// Per-file validation outcomes of the source files
    pub validation: ValidationReport,
    /// Newly copied images, in copy order
    pub new_records: Vec<ImageRecord>,
}

impl OrganizeReport {
    /// Number of images copied by this run
    pub fn total_copied(&self) -> usize {
        self.new_records.len()
    }

    /// Number of images copied for one class label
    pub fn copied_for(&self, label: usize) -> usize {
        self.new_records.iter().filter(|r| r.label == label).count()
    }
}

impl std::fmt::Display for OrganizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Organized {} new images", self.total_copied())?;
        write!(f, "{}", self.validation)?;
        write!(f, "{}", self.manifest)
    }
}

/// Builds and extends the canonical tree
#[derive(Debug, Clone)]
pub struct DatasetOrganizer {
    classes: ClassList,
    canonical_root: PathBuf,
    validator: ImageValidator,
    config: OrganizerConfig,
}

impl DatasetOrganizer {
    pub fn new(
        classes: ClassList,
        canonical_root: impl Into<PathBuf>,
        validator: ImageValidator,
        config: OrganizerConfig,
    ) -> Self {
        Self {
            classes,
            canonical_root: canonical_root.into(),
            validator,
            config,
        }
    }

    pub fn canonical_root(&self) -> &Path {
        &self.canonical_root
    }

    pub fn classes(&self) -> &ClassList {
        &self.classes
    }

    /// Organize a raw tree laid out as `<source_root>/<class>/<images>`
    ///
    /// Invalid files are recorded in the report and skipped. A missing class
    /// directory counts as zero new images. Fails only if `source_root` does
    /// not exist, or on I/O errors writing the canonical tree.
    pub fn organize(&self, source_root: &Path) -> Result<OrganizeReport> {
        if !source_root.is_dir() {
            return Err(DatasetError::SourceNotFound(source_root.to_path_buf()));
        }

        info!("Organizing dataset...");
        info!("  Source: {:?}", source_root);
        info!("  Canonical: {:?}", self.canonical_root);
        fs::create_dir_all(&self.canonical_root)?;

        let mut validation = ValidationReport::new(&self.classes);
        let mut new_records = Vec::new();

        for (label, class_name) in self.classes.iter() {
            let source_dir = source_root.join(class_name);
            if !source_dir.is_dir() {
                warn!("{} directory not found in source, recording zero images", class_name);
                validation.mark_missing(class_name);
                fs::create_dir_all(self.canonical_root.join(class_name))?;
                continue;
            }

            let copied =
                self.organize_class(label, class_name, &source_dir, None, &mut validation)?;
            new_records.extend(copied);
        }

        let manifest = self.write_manifest()?;
        info!(
            "Organization complete: {} new images, {} rejected, {} total",
            new_records.len(),
            validation.total_invalid(),
            manifest.total_images
        );
        self.log_size_assessment(&manifest);

        Ok(OrganizeReport {
            manifest,
            validation,
            new_records,
        })
    }

    /// Append images from a flat directory into one class
    ///
    /// At most `limit` valid images are copied when a limit is given.
    pub fn add_images(
        &self,
        class_name: &str,
        source_dir: &Path,
        limit: Option<usize>,
    ) -> Result<OrganizeReport> {
        let label = self.classes.require_index(class_name)?;
        if !source_dir.is_dir() {
            return Err(DatasetError::SourceNotFound(source_dir.to_path_buf()));
        }

        info!("Adding images to {} from {:?}", class_name, source_dir);
        let mut validation = ValidationReport::new(&self.classes);
        let new_records =
            self.organize_class(label, class_name, source_dir, limit, &mut validation)?;
        let manifest = self.write_manifest()?;

        info!(
            "Added {} images to {} ({} total)",
            new_records.len(),
            class_name,
            manifest.count(class_name)
        );

        Ok(OrganizeReport {
            manifest,
            validation,
            new_records,
        })
    }

    /// Validate (in parallel) then copy (sequentially) one class
    fn organize_class(
        &self,
        label: usize,
        class_name: &str,
        source_dir: &Path,
        limit: Option<usize>,
        validation: &mut ValidationReport,
    ) -> Result<Vec<ImageRecord>> {
        let dest_dir = self.canonical_root.join(class_name);
        fs::create_dir_all(&dest_dir)?;

        let files = list_images(source_dir)?;
        let outcomes: Vec<(PathBuf, Validation)> = files
            .into_par_iter()
            .map(|path| {
                let outcome = self.validator.validate(&path);
                (path, outcome)
            })
            .collect();

        // Single writer per class: indices are handed out in sorted source order
        let mut next_index = next_free_index(&dest_dir, class_name)?;
        let limit = limit.unwrap_or(usize::MAX);
        let progress = self.progress_bar(outcomes.len(), class_name);
        let mut records = Vec::new();

        for (path, outcome) in &outcomes {
            progress.inc(1);
            if records.len() >= limit {
                break;
            }
            validation.record(class_name, path, outcome);
            if !outcome.is_valid() {
                continue;
            }

            let (dest, index) = copy_into_class(
                path,
                &dest_dir,
                class_name,
                next_index,
                self.config.index_width,
            )?;
            debug!("Copied {:?} -> {:?}", path, dest);
            next_index = index + 1;
            records.push(ImageRecord {
                path: dest,
                label,
                index,
            });
        }
        progress.finish_and_clear();

        let rejected = validation.class(class_name).map(|s| s.invalid()).unwrap_or(0);
        let mark = if rejected == 0 { "✓" } else { "!" };
        info!("  {} {}: {} copied, {} rejected", mark, class_name, records.len(), rejected);
        Ok(records)
    }

    fn write_manifest(&self) -> Result<DatasetManifest> {
        let manifest = DatasetManifest::census(&self.canonical_root, &self.classes)?;
        manifest.save(&self.canonical_root.join(MANIFEST_FILE_NAME))?;
        Ok(manifest)
    }

    fn log_size_assessment(&self, manifest: &DatasetManifest) {
        for (class_name, status) in manifest.class_size_status() {
            debug!("  {}: {}", class_name, status);
        }
        info!("Dataset size: {}", manifest.size_status());
    }

    fn progress_bar(&self, len: usize, class_name: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(class_name.to_string());
        pb
    }
}

/// Canonical file name for a class image
pub fn canonical_file_name(class_name: &str, index: usize, width: usize, ext: &str) -> String {
    format!("{}_{:0width$}.{}", class_name, index, ext, width = width)
}

/// Parse the index out of a canonical file name (`<class>_<digits>.<ext>`)
pub fn parse_canonical_index(class_name: &str, path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix(class_name)?.strip_prefix('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One past the highest canonical index already used in `dest_dir`
fn next_free_index(dest_dir: &Path, class_name: &str) -> Result<usize> {
    let next = list_images(dest_dir)?
        .iter()
        .filter_map(|p| parse_canonical_index(class_name, p))
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);
    Ok(next)
}

/// Copy `source` into `dest_dir` under the first free canonical name at or
/// after `index`. Never replaces an existing file.
fn copy_into_class(
    source: &Path,
    dest_dir: &Path,
    class_name: &str,
    mut index: usize,
    width: usize,
) -> Result<(PathBuf, usize)> {
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_lowercase();

    let mut tmp = NamedTempFile::new_in(dest_dir)?;
    io::copy(&mut File::open(source)?, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;

    loop {
        let dest = dest_dir.join(canonical_file_name(class_name, index, width, &ext));
        match tmp.persist_noclobber(&dest) {
            Ok(_) => return Ok((dest, index)),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                tmp = err.file;
                index += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
