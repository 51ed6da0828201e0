//! Split → transform each page → merge.
//!
//! Stamping tools that run repeatedly against their own output accumulate
//! resources (fonts, XObjects) with every pass. The page pipeline avoids
//! that by giving every transform exactly one fresh single-page input:
//!
//! ```text
//! input.pdf
//!  │
//!  ├─ 1. Count   pdfcpu info, falling back to pdfinfo
//!  ├─ 2. Split   pdfcpu extract -mode page  → pages/page_<n>.pdf
//!  ├─ 3. Tasks   one PageTransformTask per selected page → stamped/stamped-<nnnn>.pdf
//!  └─ 4. Merge   pdfcpu merge, ascending page order, untouched pages as-is
//! ```
//!
//! Submodules:
//!
//! 1. [`orchestrator`] — drives the four steps and reports progress
//! 2. [`ops`]          — the [`PageOperation`]s (page numbers, watermark,
//!    header/footer, redaction, signatures, annotations)
//! 3. [`stamp`]        — structured pdfcpu stamp descriptors and layers
//! 4. [`overlay`]      — ImageMagick overlays and raster redaction
//! 5. [`rotate`]       — whole-document organise (grouped rotations, reorder)

pub mod ops;
pub mod orchestrator;
pub mod overlay;
pub mod rotate;
pub mod stamp;

use crate::config::ToolPrograms;
use crate::error::PdfJobError;
use crate::tool::Invoker;
use crate::workspace::JobId;
use std::path::{Path, PathBuf};

pub use orchestrator::PagePipeline;
pub use overlay::{OverlayItem, RedactRect};
pub use stamp::{StampDescriptor, StampLayer};

/// What a page operation sees while planning its tasks.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub job_id: JobId,
    pub total_pages: usize,
}

/// Transform parameters of one page.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParams {
    /// Text or image stamps, applied in order.
    Stamp(Vec<StampLayer>),
    /// Black rectangles burnt into a raster of the page.
    Redact(Vec<RedactRect>),
    /// Items composited into one transparent overlay, then image-stamped.
    Overlay(Vec<OverlayItem>),
}

/// A per-page operation run by the [`PagePipeline`].
///
/// Implementations only plan: given a page index they return the transform
/// parameters for it, or `None` to let the page pass through unmodified.
/// Planning never looks at another page's output, so tasks may run in any
/// order.
pub trait PageOperation: Send + Sync {
    /// Short identifier, e.g. `page-numbers`.
    fn name(&self) -> &'static str;

    /// Verb phrase used in error messages: "failed to {action}".
    fn action(&self) -> &'static str;

    /// Suffix of the output file name, e.g. `numbered`.
    fn output_suffix(&self) -> &'static str;

    /// Validate parameters once the page count is known.
    fn prepare(&self, ctx: &PipelineContext) -> Result<(), PdfJobError> {
        let _ = ctx;
        Ok(())
    }

    /// Parameters for 1-indexed `page`, or `None` to pass it through.
    fn task_params(&self, page: usize, ctx: &PipelineContext) -> Option<TaskParams>;

    /// Whether the merged result is rewritten with `qpdf --linearize`.
    fn linearize_output(&self) -> bool {
        false
    }
}

/// Everything a page task needs to invoke tools. Paths are relative to
/// `job_dir`, which is also the working directory of every invocation.
#[derive(Debug, Clone)]
pub struct TaskEnv<'a> {
    pub invoker: &'a Invoker,
    pub programs: &'a ToolPrograms,
    pub job_dir: &'a Path,
    /// Job-relative scratch directory private to this page.
    pub scratch: String,
    pub redaction_dpi: u32,
}

impl TaskEnv<'_> {
    pub fn scratch_file(&self, name: &str) -> String {
        format!("{}/{}", self.scratch, name)
    }
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Merged document inside the job directory.
    pub output: PathBuf,
    pub total_pages: usize,
    /// Pages that went through a transform (the rest passed through).
    pub transformed_pages: usize,
    /// Merge inputs in order, relative to the job directory.
    pub page_outputs: Vec<String>,
    pub duration_ms: u64,
}
