//! # edgequake-pdfjobs
//!
//! Job workspaces, page pipelines, and lazy previews around external PDF
//! command-line tools.
//!
//! ## Why this crate?
//!
//! Tools like pdfcpu, poppler, and ImageMagick do the actual PDF work, but a
//! service built on them has to answer the same questions every time: where
//! do a request's files live and when do they go away, what happens when a
//! tool hangs, what did the tool name its output this time, and how to stamp
//! every page of a long document without the file growing with each pass.
//! This crate answers them once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Job      fresh directory under the storage root, input.pdf
//!  ├─ 2. Count    pdfcpu info / pdfinfo
//!  ├─ 3. Split    one single-page PDF per page
//!  ├─ 4. Tasks    per-page stamp, overlay, or raster redaction
//!  ├─ 5. Merge    ascending page order, untouched pages as-is
//!  └─ 6. Serve    /downloads/<job>/<file>, swept after the retention window
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfjobs::pipeline::ops::PageNumbers;
//! use edgequake_pdfjobs::{Invoker, Job, PagePipeline, ServiceConfig, SystemRunner, Workspaces};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().storage_root("/tmp/pdfjobs").build()?;
//!     let invoker = Invoker::new(Arc::new(SystemRunner), &config);
//!     let pipeline = PagePipeline::new(invoker, &config);
//!
//!     let job = Workspaces::new(&config.storage_root).create_job().await?;
//!     job.save_input(std::fs::read("report.pdf")?).await?;
//!
//!     let op = PageNumbers::new().start_at(5);
//!     let name = Job::output_name("report.pdf", "numbered");
//!     let outcome = pipeline.run(&job, &op, &name).await?;
//!     eprintln!("{} pages -> {}", outcome.total_pages, outcome.output.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfjobs` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## External Programs
//!
//! | Program | Used for |
//! |---------|----------|
//! | `pdfcpu` | page count, split, stamp/watermark, merge, rotate, collect |
//! | `pdfinfo` | page count (fallback or preferred), page size |
//! | `pdftoppm` | preview thumbnails, redaction rasters |
//! | `convert` | overlays, redaction painting, raster to PDF |
//! | `qpdf` | linearising redacted output |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod gateway;
pub mod naming;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod server;
pub mod state;
pub mod tool;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSelection, ServiceConfig, ServiceConfigBuilder, ToolPrograms};
pub use error::{ErrorCategory, GatewayError, PdfJobError, ToolError};
pub use gateway::{FileKind, Gateway, ResolvedFile};
pub use naming::ArtifactRole;
pub use pipeline::{PageOperation, PagePipeline, PipelineOutcome};
pub use preview::{PreviewMaterializer, PreviewPage};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use state::{ArtifactState, StateTracker};
pub use tool::{CommandSpec, Invoker, SystemRunner, ToolOutput, ToolRunner};
pub use workspace::{Job, JobId, SweepReport, Workspaces};
