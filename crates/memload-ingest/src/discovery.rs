//! Batch discovery
//!
//! Patterns use shell glob syntax, e.g. `/data/appsinstalled/*.tsv.gz`:
//! `*`, `?` and `[...]` classes, in the file name or in directories. Files
//! already carrying the done marker are skipped.

use memload_common::{MemloadError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::completion::is_marked;

/// Whether a matched path is a batch still waiting to be loaded
fn is_pending(path: &Path) -> bool {
    let unmarked = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| !is_marked(name));
    unmarked && path.is_file()
}

/// List unprocessed batches matching `pattern`, sorted by path
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths =
        glob::glob(pattern).map_err(|e| MemloadError::invalid_pattern(pattern, e.to_string()))?;

    let mut batches = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if is_pending(&path) => batches.push(path),
            Ok(_) => {},
            Err(e) => warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable path"),
        }
    }

    batches.sort();
    debug!(pattern, found = batches.len(), "Discovered batches");
    Ok(batches)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn test_discover_skips_marked_and_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["b.tsv.gz", "a.tsv.gz", ".done.tsv.gz", "notes.txt"]);
        std::fs::create_dir(dir.path().join("sub.tsv.gz")).unwrap();

        let pattern = format!("{}/*.tsv.gz", dir.path().display());
        let found = discover(&pattern).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.tsv.gz"), dir.path().join("b.tsv.gz")]
        );
    }

    #[test]
    fn test_character_classes_and_single_wildcards() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["20170929.tsv.gz", "20170930.tsv.gz", "2017092x.tsv.gz", "201709291.tsv.gz"]);

        let pattern = format!("{}/2017092[0-9].tsv.gz", dir.path().display());
        assert_eq!(discover(&pattern).unwrap(), vec![dir.path().join("20170929.tsv.gz")]);

        let pattern = format!("{}/201709??.tsv.gz", dir.path().display());
        assert_eq!(discover(&pattern).unwrap().len(), 3);
    }

    #[test]
    fn test_wildcards_in_directories() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["east", "west"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
            touch(&dir.path().join(sub), &["a.tsv.gz", ".a.tsv.gz"]);
        }

        let pattern = format!("{}/*/a.tsv.gz", dir.path().display());
        assert_eq!(
            discover(&pattern).unwrap(),
            vec![dir.path().join("east/a.tsv.gz"), dir.path().join("west/a.tsv.gz")]
        );
    }

    #[test]
    fn test_missing_directory_finds_nothing() {
        assert!(discover("/nonexistent/memload/*.tsv.gz").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = discover("/data/[.tsv.gz").unwrap_err();
        assert!(matches!(err, MemloadError::InvalidPattern { .. }));
    }
}
