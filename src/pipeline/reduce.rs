//! Document reduction: keep the leading and trailing pages of an oversized PDF.
//!
//! ## Why first two and last two pages?
//!
//! A contract note carries its header (client, dates, note number) on the
//! first pages and the obligation summary (taxes, net amounts) on the last
//! ones. The middle pages repeat the transaction table, so dropping them keeps
//! the upload under the service's size limit while losing the least data.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks while it parses and serialises. The work runs on the
//! blocking pool so the Tokio worker threads keep serving other documents of a
//! batch.

use crate::error::ReductionError;
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Documents with at most this many pages are kept whole.
pub const KEEP_ALL_MAX_PAGES: usize = 4;

/// The reduced document, owned by one extraction.
///
/// The temporary file is deleted when this value is dropped, on every exit
/// path of the caller.
#[derive(Debug)]
pub struct ReducedDocument {
    /// Temporary `.pdf` holding the reduced document.
    pub file: NamedTempFile,
    /// Page count of the source document.
    pub original_pages: usize,
    /// 0-based indices of the source pages that were kept.
    pub kept_pages: Vec<usize>,
    /// Source size in bytes.
    pub original_size: u64,
    /// Reduced size in bytes.
    pub reduced_size: u64,
}

impl ReducedDocument {
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

/// Pages to keep from a document of `total` pages, 0-based and ascending.
///
/// All pages when `total <= 4`, otherwise `[0, 1, total-2, total-1]`. The two
/// ranges never overlap for `total >= 5`, but the list is deduplicated anyway
/// so callers can rely on it.
pub fn select_pages(total: usize) -> Vec<usize> {
    if total <= KEEP_ALL_MAX_PAGES {
        return (0..total).collect();
    }
    let mut pages = vec![0, 1, total - 2, total - 1];
    pages.sort_unstable();
    pages.dedup();
    pages
}

/// Bind the pdfium shared library.
///
/// Lookup order: `PDFIUM_LIB_PATH` (a file or a directory), the working
/// directory, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, ReductionError> {
    if let Ok(custom) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(&custom);
        let lib = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        debug!("Binding pdfium from PDFIUM_LIB_PATH: {}", lib.display());
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| ReductionError::PdfiumUnavailable(format!("{}: {:?}", lib.display(), e)));
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ReductionError::PdfiumUnavailable(format!("{:?}", e)))
}

/// Reduce `bytes` to the pages chosen by [`select_pages`] and write the result
/// to a temporary file.
pub async fn reduce_document(bytes: Vec<u8>) -> Result<ReducedDocument, ReductionError> {
    tokio::task::spawn_blocking(move || reduce_blocking(&bytes))
        .await
        .map_err(|e| ReductionError::Task(e.to_string()))?
}

fn reduce_blocking(bytes: &[u8]) -> Result<ReducedDocument, ReductionError> {
    let pdfium = bind_pdfium()?;
    let (reduced, original_pages, kept_pages) = copy_selected_pages(&pdfium, bytes)?;

    let mut file = tempfile::Builder::new()
        .prefix("reduced_")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(&reduced)?;
    file.flush()?;

    let doc = ReducedDocument {
        file,
        original_pages,
        kept_pages,
        original_size: bytes.len() as u64,
        reduced_size: reduced.len() as u64,
    };
    info!(
        "Reduced PDF from {} to {} pages ({} → {} bytes)",
        doc.original_pages,
        doc.kept_pages.len(),
        doc.original_size,
        doc.reduced_size
    );
    Ok(doc)
}

/// Copy the selected pages of `bytes` into a new document and serialise it.
fn copy_selected_pages(
    pdfium: &Pdfium,
    bytes: &[u8],
) -> Result<(Vec<u8>, usize, Vec<usize>), ReductionError> {
    let source = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ReductionError::Unparseable(format!("{:?}", e)))?;
    let total = source.pages().len() as usize;
    let keep = select_pages(total);
    debug!("Keeping pages {:?} of {}", keep, total);

    let mut target = pdfium
        .create_new_pdf()
        .map_err(|e| ReductionError::Save(format!("{:?}", e)))?;

    for &idx in &keep {
        let dest = target.pages().len();
        target
            .pages_mut()
            .copy_page_from_document(&source, idx as u16, dest)
            .map_err(|e| ReductionError::PageCopy {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;
    }

    let out = target
        .save_to_bytes()
        .map_err(|e| ReductionError::Save(format!("{:?}", e)))?;
    Ok((out, total, keep))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_documents_keep_every_page() {
        assert_eq!(select_pages(0), Vec::<usize>::new());
        assert_eq!(select_pages(1), vec![0]);
        assert_eq!(select_pages(4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn large_documents_keep_first_and_last_two() {
        assert_eq!(select_pages(5), vec![0, 1, 3, 4]);
        assert_eq!(select_pages(6), vec![0, 1, 4, 5]);
        assert_eq!(select_pages(10), vec![0, 1, 8, 9]);
    }

    #[test]
    fn selection_is_sorted_and_unique() {
        for n in 0..=40 {
            let pages = select_pages(n);
            assert_eq!(pages.len(), n.min(4), "n={n}");
            assert!(pages.windows(2).all(|w| w[0] < w[1]), "n={n}: {pages:?}");
            assert!(pages.iter().all(|&p| p < n));
        }
    }

    #[tokio::test]
    async fn garbage_bytes_are_rejected() {
        // Without a pdfium library this fails at binding instead; either way
        // it is an error and nothing is written.
        let err = reduce_document(b"%PDF-1.4 not really".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReductionError::Unparseable(_) | ReductionError::PdfiumUnavailable(_)
        ));
    }

    /// Builds a real PDF with pdfium and reduces it. Skipped when no pdfium
    /// library can be bound on this machine.
    #[tokio::test]
    async fn reduces_ten_pages_to_four() {
        let Ok(pdfium) = bind_pdfium() else {
            eprintln!("pdfium not available, skipping");
            return;
        };
        let bytes = {
            let mut doc = pdfium.create_new_pdf().unwrap();
            for _ in 0..10 {
                doc.pages_mut()
                    .create_page_at_end(PdfPagePaperSize::a4())
                    .unwrap();
            }
            doc.save_to_bytes().unwrap()
        };
        drop(pdfium);

        let reduced = reduce_document(bytes.clone()).await.unwrap();
        assert_eq!(reduced.original_pages, 10);
        assert_eq!(reduced.kept_pages, vec![0, 1, 8, 9]);
        assert_eq!(reduced.original_size, bytes.len() as u64);

        let path = reduced.path().to_path_buf();
        assert!(path.exists());
        drop(reduced);
        assert!(!path.exists(), "temp file must be removed on drop");
    }
}
