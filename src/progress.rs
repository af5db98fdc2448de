//! Progress-callback trait for per-document extraction events.
//!
//! Attach an [`Arc<dyn ExtractionProgressCallback>`] with
//! [`crate::Extractor::with_progress`] to receive events while
//! [`crate::Extractor::extract_batch`] works through its documents.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a channel or a log
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` because documents of a batch are extracted
//! concurrently.
//!
//! # Example
//!
//! ```rust
//! use contract_note_extractor::ExtractionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, total: usize, success: bool, _transactions: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{}/{} done (ok: {})", done, total, success);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the batch runner as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_document_start` and `on_document_complete` may be
/// called concurrently from different tasks; protect shared state with
/// `Mutex` or atomics.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any document is read.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a document enters the pipeline.
    ///
    /// # Arguments
    /// * `index`: 0-based position in the batch
    /// * `total`: batch size
    /// * `name` : file name of the document
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document's result is ready, successful or not.
    fn on_document_complete(&self, index: usize, total: usize, success: bool, transactions: usize) {
        let _ = (index, total, success, transactions);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Shared handle type stored by the extractor.
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        started: AtomicUsize,
        succeeded: AtomicUsize,
        failed: AtomicUsize,
        batch_total: AtomicUsize,
    }

    impl ExtractionProgressCallback for Tracking {
        fn on_batch_start(&self, total: usize) {
            self.batch_total.store(total, Ordering::SeqCst);
        }

        fn on_document_start(&self, _index: usize, _total: usize, _name: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, success: bool, _tx: usize) {
            if success {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(0, 2, "a.pdf");
        cb.on_document_complete(0, 2, true, 12);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb: ProgressCallback = Arc::new(Tracking::default());
        cb.on_batch_start(3);
        for i in 0..3 {
            cb.on_document_start(i, 3, "note.pdf");
        }
        cb.on_document_complete(0, 3, true, 4);
        cb.on_document_complete(1, 3, false, 0);
        cb.on_document_complete(2, 3, true, 1);
        cb.on_batch_complete(3, 2);
    }

    #[test]
    fn counts_are_tracked() {
        let t = Tracking::default();
        t.on_batch_start(2);
        t.on_document_start(0, 2, "a.pdf");
        t.on_document_complete(0, 2, false, 0);
        assert_eq!(t.batch_total.load(Ordering::SeqCst), 2);
        assert_eq!(t.started.load(Ordering::SeqCst), 1);
        assert_eq!(t.failed.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 0);
    }
}
