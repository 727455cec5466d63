//! Completion marking
//!
//! A consumed batch is renamed in place with a leading [`DONE_MARKER`], which
//! hides it from later discovery passes.

use std::io;
use std::path::{Path, PathBuf};

pub const DONE_MARKER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The batch now lives at this path
    Renamed(PathBuf),
    /// The batch was marked by an earlier call
    AlreadyMarked,
}

/// Whether a file name carries the done marker
pub fn is_marked(file_name: &str) -> bool {
    file_name.starts_with(DONE_MARKER)
}

/// Path the batch is renamed to, `None` for paths without a file name
pub fn done_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    if is_marked(&name) {
        return Some(path.to_path_buf());
    }
    Some(path.with_file_name(format!("{DONE_MARKER}{name}")))
}

/// Rename `path` to its done name. Marking twice is a no-op.
pub fn mark_done(path: &Path) -> io::Result<MarkOutcome> {
    let Some(done) = done_path(path) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        ));
    };

    if done == path {
        return Ok(MarkOutcome::AlreadyMarked);
    }

    match std::fs::rename(path, &done) {
        Ok(()) => Ok(MarkOutcome::Renamed(done)),
        Err(e) if e.kind() == io::ErrorKind::NotFound && done.exists() => {
            Ok(MarkOutcome::AlreadyMarked)
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_done_path() {
        assert_eq!(
            done_path(Path::new("/data/20170929000000.tsv.gz")),
            Some(PathBuf::from("/data/.20170929000000.tsv.gz"))
        );
        assert_eq!(
            done_path(Path::new("/data/.done.tsv.gz")),
            Some(PathBuf::from("/data/.done.tsv.gz"))
        );
        assert_eq!(done_path(Path::new("/")), None);
    }

    #[test]
    fn test_mark_done_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("batch.tsv.gz");
        std::fs::write(&batch, b"x").unwrap();

        let done = dir.path().join(".batch.tsv.gz");
        assert_eq!(mark_done(&batch).unwrap(), MarkOutcome::Renamed(done.clone()));
        assert!(!batch.exists());
        assert!(done.exists());

        assert_eq!(mark_done(&batch).unwrap(), MarkOutcome::AlreadyMarked);
        assert_eq!(mark_done(&done).unwrap(), MarkOutcome::AlreadyMarked);
        assert!(done.exists());
    }

    #[test]
    fn test_mark_missing_batch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = mark_done(&dir.path().join("never.tsv.gz")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
