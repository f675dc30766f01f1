//! Input staging: write an uploaded document into the scratch directory.
//!
//! ## Why a named temp file?
//!
//! The poppler tools require a file-system path; they cannot read the upload
//! from our memory. [`TempInputFile`] wraps a [`NamedTempFile`] created with a
//! random name inside the configured scratch directory, so concurrent
//! requests never collide, and the file is removed when the handle is
//! dropped: on success, on error, on panic unwinding, and when the request
//! future is cancelled.

use crate::error::ConvertError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

/// A request-scoped copy of the uploaded PDF.
#[derive(Debug)]
pub struct TempInputFile {
    file: NamedTempFile,
}

impl TempInputFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Create the scratch directory if it does not exist yet.
pub fn prepare_scratch_dir(dir: &Path) -> Result<(), ConvertError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        ConvertError::InvalidConfig(format!(
            "Scratch directory '{}' is not usable: {e}",
            dir.display()
        ))
    })
}

/// Write `bytes` to a fresh temp file inside `scratch_dir`.
///
/// Blocking; call from `spawn_blocking` or use [`stage_upload`].
pub fn stage_bytes(scratch_dir: &Path, bytes: &[u8]) -> Result<TempInputFile, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::invalid("Uploaded document is empty"));
    }

    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        // The tool has the final word on what it accepts.
        debug!("Upload does not start with %PDF magic bytes");
    }

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".pdf")
        .tempfile_in(scratch_dir)
        .map_err(|e| ConvertError::Internal(format!("Failed to create temp file: {e}")))?;

    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ConvertError::Internal(format!("Failed to write temp file: {e}")))?;

    debug!("Staged {} bytes at {}", bytes.len(), file.path().display());
    Ok(TempInputFile { file })
}

/// Async wrapper around [`stage_bytes`] that keeps file I/O off the runtime threads.
pub async fn stage_upload(
    scratch_dir: PathBuf,
    bytes: axum::body::Bytes,
) -> Result<TempInputFile, ConvertError> {
    tokio::task::spawn_blocking(move || stage_bytes(&scratch_dir, &bytes))
        .await
        .map_err(|e| ConvertError::Internal(format!("Staging task panicked: {e}")))?
}

/// Create a private output directory for tools that write files (pdftoppm).
pub fn output_dir(scratch_dir: &Path) -> Result<TempDir, ConvertError> {
    tempfile::Builder::new()
        .prefix("render-")
        .tempdir_in(scratch_dir)
        .map_err(|e| {
            warn!("Cannot create render directory in {}: {e}", scratch_dir.display());
            ConvertError::Internal(format!("Failed to create output directory: {e}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn staged_file_is_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let staged = stage_bytes(scratch.path(), b"%PDF-1.7\n...").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(scratch.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7\n...");

        drop(staged);
        assert!(!path.exists());
        assert_eq!(entries(scratch.path()), 0);
    }

    #[test]
    fn concurrent_stagings_get_distinct_files() {
        let scratch = tempfile::tempdir().unwrap();
        let a = stage_bytes(scratch.path(), b"%PDF-a").unwrap();
        let b = stage_bytes(scratch.path(), b"%PDF-b").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(entries(scratch.path()), 2);
    }

    #[test]
    fn empty_upload_is_rejected_without_touching_disk() {
        let scratch = tempfile::tempdir().unwrap();
        let err = stage_bytes(scratch.path(), b"").unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        assert_eq!(entries(scratch.path()), 0);
    }

    #[test]
    fn missing_scratch_dir_is_internal_error() {
        let scratch = tempfile::tempdir().unwrap();
        let gone = scratch.path().join("does-not-exist");
        let err = stage_bytes(&gone, b"%PDF").unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn prepare_scratch_dir_creates_nested_dirs() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        prepare_scratch_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn output_dir_is_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let out = output_dir(scratch.path()).unwrap();
        std::fs::write(out.path().join("page-1.png"), b"x").unwrap();
        drop(out);
        assert_eq!(entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn stage_upload_runs_off_runtime() {
        let scratch = tempfile::tempdir().unwrap();
        let staged = stage_upload(
            scratch.path().to_path_buf(),
            axum::body::Bytes::from_static(b"%PDF-1.4"),
        )
        .await
        .unwrap();
        assert!(staged.path().exists());
    }
}
