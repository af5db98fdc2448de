//! Input resolution: read a user-supplied path into memory and check it is a PDF.
//!
//! ## Why read the whole file?
//!
//! Every later stage needs the bytes: the size gate, the reducer (pdfium loads
//! from a byte slice) and the multipart upload. Contract notes are small, so
//! one read up front is simpler than re-opening the file per stage. We check
//! the `%PDF` magic here so the caller gets a meaningful error instead of an
//! upload the model service will reject.

use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A document ready for the pipeline.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// File name sent with the upload.
    pub name: String,
    /// Where the document came from, when it was read from disk.
    pub path: Option<PathBuf>,
    pub bytes: Vec<u8>,
}

impl LoadedDocument {
    /// Wrap bytes that did not come from a file (e.g. an upload widget).
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: None,
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Read a local PDF, validating existence, permissions and magic bytes.
pub async fn load_local(path: &Path) -> Result<LoadedDocument, ExtractError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    check_magic(&bytes, path)?;
    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());

    Ok(LoadedDocument {
        name: file_name(path),
        path: Some(path.to_path_buf()),
        bytes,
    })
}

/// Reject documents that do not start with `%PDF`.
pub fn check_magic(bytes: &[u8], path: &Path) -> Result<(), ExtractError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(ExtractError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

/// Final path component, or `document.pdf` when there is none.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_local(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04zip archive").unwrap();
        let err = load_local(f.path()).await.unwrap_err();
        match err {
            ExtractError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn pdf_is_loaded_with_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%%EOF").unwrap();
        let doc = load_local(&path).await.unwrap();
        assert_eq!(doc.name, "note.pdf");
        assert_eq!(doc.size(), 14);
        assert_eq!(doc.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn short_input_magic_is_zero_padded() {
        let err = check_magic(b"%P", Path::new("x")).unwrap_err();
        assert!(matches!(err, ExtractError::NotAPdf { magic, .. } if magic == [b'%', b'P', 0, 0]));
    }

    #[test]
    fn file_name_fallback() {
        assert_eq!(file_name(Path::new("/tmp/a/b.pdf")), "b.pdf");
        assert_eq!(file_name(Path::new("/")), "document.pdf");
    }
}
