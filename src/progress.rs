//! Progress-callback trait for per-page pipeline events.
//!
//! Attach an [`Arc<dyn PipelineProgressCallback>`] with
//! [`crate::pipeline::PagePipeline::with_progress`] to receive events as the
//! pipeline splits, transforms, and merges a document. The HTTP layer runs
//! without one; the `pdfjobs number` command drives a terminal progress bar
//! from it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfjobs::PipelineProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, transformed: bool) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Page {}/{} done (transformed: {}), {} so far", page_num, total_pages, transformed, done);
//!     }
//! }
//!
//! let cb: Arc<dyn PipelineProgressCallback> = Arc::new(CountingCallback {
//!     completed: AtomicUsize::new(0),
//! });
//! cb.on_page_complete(1, 3, true);
//! ```

use std::sync::Arc;

/// Called by the page pipeline as it processes each page.
///
/// Implementations must be `Send + Sync`: with a page concurrency above 1,
/// `on_page_start`, `on_page_complete`, and `on_page_error` may be called
/// from several tasks at once. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once the page count is known, before splitting.
    fn on_pipeline_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page's source is resolved.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page is ready to merge.
    ///
    /// `transformed` is false for pages that pass through unmodified.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, transformed: bool) {
        let _ = (page_num, total_pages, transformed);
    }

    /// Called when a page task fails. The run aborts right after.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the merged output has been written.
    fn on_pipeline_complete(&self, total_pages: usize, transformed_pages: usize) {
        let _ = (total_pages, transformed_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Shared handle stored by the pipeline.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
