//! The page pipeline driver.
//!
//! A run either produces the merged output or fails as a whole. There is no
//! partial result and no retry: any page task that fails aborts the run,
//! and the caller resubmits.

use crate::config::{ServiceConfig, ToolPrograms};
use crate::error::PdfJobError;
use crate::naming::{ArtifactRole, PAGES_DIR, STAMPED_DIR};
use crate::pipeline::stamp::{self, StampDescriptor, StampLayer};
use crate::pipeline::{
    overlay, PageOperation, PipelineContext, PipelineOutcome, TaskEnv, TaskParams,
};
use crate::progress::ProgressCallback;
use crate::tool::probe::{self, ProbeOrder};
use crate::tool::Invoker;
use crate::workspace::{Job, INPUT_FILE};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the merged document before linearisation.
const MERGED_FILE: &str = "merged.pdf";
/// Job subdirectory holding per-page scratch files.
const SCRATCH_DIR: &str = "work";

/// One page ready to merge.
#[derive(Debug)]
struct PageArtifact {
    rel_path: String,
    transformed: bool,
}

/// Runs [`PageOperation`]s over the pages of a job's input document.
#[derive(Clone)]
pub struct PagePipeline {
    invoker: Invoker,
    programs: ToolPrograms,
    page_concurrency: usize,
    redaction_dpi: u32,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for PagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePipeline")
            .field("programs", &self.programs)
            .field("page_concurrency", &self.page_concurrency)
            .field("redaction_dpi", &self.redaction_dpi)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl PagePipeline {
    pub fn new(invoker: Invoker, config: &ServiceConfig) -> Self {
        Self {
            invoker,
            programs: config.programs.clone(),
            page_concurrency: config.page_concurrency.max(1),
            redaction_dpi: config.redaction_dpi,
            progress: None,
        }
    }

    /// Receive per-page events while running.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn programs(&self) -> &ToolPrograms {
        &self.programs
    }

    /// Run `op` over `job`'s `input.pdf`, writing `output_name` in the job
    /// directory.
    pub async fn run(
        &self,
        job: &Job,
        op: &dyn PageOperation,
        output_name: &str,
    ) -> Result<PipelineOutcome, PdfJobError> {
        let start = Instant::now();
        let dir = job.dir();
        info!("Job {}: starting {}", job.id(), op.name());

        // ── Step 1: Count pages ──────────────────────────────────────────
        let total_pages = probe::page_count(
            &self.invoker,
            &self.programs,
            dir,
            Path::new(INPUT_FILE),
            ProbeOrder::PdfcpuFirst,
        )
        .await?;
        let ctx = PipelineContext {
            job_id: job.id().clone(),
            total_pages,
        };
        op.prepare(&ctx)?;
        if let Some(ref cb) = self.progress {
            cb.on_pipeline_start(total_pages);
        }
        debug!("Job {}: {} pages", job.id(), total_pages);

        // ── Step 2: Split into single-page files ─────────────────────────
        job.ensure_subdir(PAGES_DIR).await?;
        job.ensure_subdir(STAMPED_DIR).await?;
        self.invoker
            .run(
                dir,
                &self.programs.pdfcpu,
                ["extract", "-mode", "page", INPUT_FILE, PAGES_DIR],
            )
            .await
            .map_err(|e| PdfJobError::tool("prepare pages", e))?;

        // ── Step 3: One task per page ────────────────────────────────────
        let artifacts: Vec<PageArtifact> = stream::iter(1..=total_pages)
            .map(|page| self.process_page(job, op, &ctx, page))
            .buffered(self.page_concurrency)
            .try_collect()
            .await?;
        let transformed_pages = artifacts.iter().filter(|a| a.transformed).count();

        // ── Step 4: Merge in page order ──────────────────────────────────
        let page_outputs: Vec<String> = artifacts.into_iter().map(|a| a.rel_path).collect();
        let merge_target = if op.linearize_output() {
            MERGED_FILE
        } else {
            output_name
        };
        let mut args = vec!["merge".to_string(), merge_target.to_string()];
        args.extend(page_outputs.iter().cloned());
        self.invoker
            .run(dir, &self.programs.pdfcpu, args)
            .await
            .map_err(|e| PdfJobError::tool("write output", e))?;

        if op.linearize_output() {
            self.invoker
                .run(
                    dir,
                    &self.programs.qpdf,
                    [
                        "--warning-exit-0",
                        "--linearize",
                        "--compress-streams=y",
                        "--object-streams=disable",
                        MERGED_FILE,
                        output_name,
                    ],
                )
                .await
                .map_err(|e| PdfJobError::tool("write output", e))?;
            if let Err(e) = tokio::fs::remove_file(job.path(MERGED_FILE)).await {
                debug!("Could not remove {}: {}", MERGED_FILE, e);
            }
        }

        if let Some(ref cb) = self.progress {
            cb.on_pipeline_complete(total_pages, transformed_pages);
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Job {}: {} complete, {}/{} pages transformed in {}ms",
            job.id(),
            op.name(),
            transformed_pages,
            total_pages,
            duration_ms
        );

        Ok(PipelineOutcome {
            output: job.path(output_name),
            total_pages,
            transformed_pages,
            page_outputs,
            duration_ms,
        })
    }

    async fn process_page(
        &self,
        job: &Job,
        op: &dyn PageOperation,
        ctx: &PipelineContext,
        page: usize,
    ) -> Result<PageArtifact, PdfJobError> {
        let total = ctx.total_pages;
        if let Some(ref cb) = self.progress {
            cb.on_page_start(page, total);
        }

        let result = self.transform_page(job, op, ctx, page).await;
        match (&result, &self.progress) {
            (Ok(artifact), Some(cb)) => cb.on_page_complete(page, total, artifact.transformed),
            (Err(e), Some(cb)) => cb.on_page_error(page, total, &e.to_string()),
            _ => {}
        }
        if let Err(ref e) = result {
            warn!("Job {}: page {}/{} failed: {}", job.id(), page, total, e);
        }
        result
    }

    async fn transform_page(
        &self,
        job: &Job,
        op: &dyn PageOperation,
        ctx: &PipelineContext,
        page: usize,
    ) -> Result<PageArtifact, PdfJobError> {
        let source_role = ArtifactRole::PageSource(page);
        source_role.canonicalize_in(job.dir()).await?;
        let source = relative(source_role);

        let Some(params) = op.task_params(page, ctx) else {
            debug!("Page {}: pass-through", page);
            return Ok(PageArtifact {
                rel_path: source,
                transformed: false,
            });
        };

        let scratch = format!("{SCRATCH_DIR}/page-{page}");
        job.ensure_subdir(&scratch).await?;
        let env = TaskEnv {
            invoker: &self.invoker,
            programs: &self.programs,
            job_dir: job.dir(),
            scratch,
            redaction_dpi: self.redaction_dpi,
        };
        let output = relative(ArtifactRole::PageOutput(page));
        execute(&env, &params, &source, &output, op.action()).await?;
        debug!("Page {}: {} -> {}", page, source, output);

        Ok(PageArtifact {
            rel_path: output,
            transformed: true,
        })
    }
}

/// Job-relative path of a canonical per-page artifact.
fn relative(role: ArtifactRole) -> String {
    format!("{}/{}", role.subdir(), role.canonical_name())
}

/// Produce `output` from `source` according to `params`.
async fn execute(
    env: &TaskEnv<'_>,
    params: &TaskParams,
    source: &str,
    output: &str,
    step: &str,
) -> Result<(), PdfJobError> {
    match params {
        TaskParams::Stamp(layers) if layers.is_empty() => Err(PdfJobError::Internal(
            "stamp task without layers".to_string(),
        )),
        TaskParams::Stamp(layers) => stamp::apply_layers(env, layers, source, output, step).await,
        TaskParams::Redact(rects) => overlay::redact_page(env, rects, source, output, step).await,
        TaskParams::Overlay(items) => {
            let overlay = overlay::render_overlay(env, items, source, step).await?;
            let layer = StampLayer::image(overlay, StampDescriptor::full_page_overlay());
            stamp::apply_layers(env, std::slice::from_ref(&layer), source, output, step).await
        }
    }
}
