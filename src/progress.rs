//! Progress-callback trait for per-page OCR events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to observe a run.
//! Pages are processed strictly one after another, so events for a run
//! arrive in page order and never overlap.
//!
//! # Example
//!
//! ```rust
//! use vision_ocr::{OcrConfig, OcrProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl OcrProgressCallback for Counter {
//!     fn on_page_complete(&self, label: &str, _n: usize, _total: usize, chars: usize, _truncated: bool) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{label}: {chars} chars");
//!     }
//! }
//!
//! let config = OcrConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the page loop as it processes each page.
///
/// All methods default to no-ops so callers only override what they need.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once, after page selection, before the first render.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once a page image is ready, just before it is sent.
    ///
    /// `index` is 1-based position within the selection, not the page number.
    fn on_page_start(&self, label: &str, index: usize, total_pages: usize) {
        let _ = (label, index, total_pages);
    }

    /// Called when a page's reply has been aggregated and normalised.
    ///
    /// `chars` is the length of the raw aggregated reply.
    fn on_page_complete(
        &self,
        label: &str,
        index: usize,
        total_pages: usize,
        chars: usize,
        truncated: bool,
    ) {
        let _ = (label, index, total_pages, chars, truncated);
    }

    /// Called once after every selected page succeeded.
    fn on_run_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl OcrProgressCallback for Recorder {
        fn on_run_start(&self, total_pages: usize) {
            self.events.lock().unwrap().push(format!("start {total_pages}"));
        }

        fn on_page_complete(&self, label: &str, index: usize, total: usize, _c: usize, truncated: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{label} {index}/{total} truncated={truncated}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2);
        cb.on_page_start("page 1", 1, 2);
        cb.on_page_complete("page 1", 1, 2, 42, false);
        cb.on_run_complete(2);
    }

    #[test]
    fn recorder_sees_overridden_events_only() {
        let rec = Recorder::default();
        rec.on_run_start(1);
        rec.on_page_start("scan.png", 1, 1);
        rec.on_page_complete("scan.png", 1, 1, 10, true);
        rec.on_run_complete(1);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start 1".to_string(), "scan.png 1/1 truncated=true".to_string()]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(10);
    }
}
