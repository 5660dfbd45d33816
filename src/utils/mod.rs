//! Utilities: logging setup, the crate error type and small helpers
//!
//! This module provides:
//! - Structured logging with tracing
//! - The crate error type
//! - Atomic file writes shared by the organizer and the split writer

pub mod error;
pub mod logging;

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

pub use error::{DatasetError, Result};
pub use logging::{init_logging, LogConfig, LogLevel};

/// Write `contents` to `path` atomically, replacing any previous file
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target, so readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Format a percentage of `part` in `total`, guarding against division by zero
pub fn format_percentage(part: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", 100.0 * part as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(1, 4), "25.0%");
        assert_eq!(format_percentage(3, 0), "0.0%");
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // Only the target remains, no stray temporaries
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
