//! Page thumbnails, eager and lazy.
//!
//! ## Eager
//!
//! [`PreviewMaterializer::render_all`] counts pages, renders the whole
//! document with one `pdftoppm` call, moves every thumbnail to its
//! canonical `previews/page-<n>.png` name, and answers with the list of
//! URLs. Pages the renderer did not produce stay unknown and are rendered
//! on first request.
//!
//! ## Lazy
//!
//! [`PreviewMaterializer::materialize`] renders one missing page on demand.
//! Concurrent requests for the same page serialise on the
//! [`StateTracker`] slot, so `pdftoppm` runs once and the waiters find the
//! file on disk.
//!
//! Renders land in a scratch directory first; a thumbnail becomes visible
//! under `previews/` only through a rename, never half-written.

use crate::config::{ServiceConfig, ToolPrograms};
use crate::error::PdfJobError;
use crate::naming::{self, ArtifactRole, PREVIEWS_DIR};
use crate::state::{ArtifactState, StateTracker};
use crate::tool::probe::{self, ProbeOrder};
use crate::tool::Invoker;
use crate::workspace::{Job, INPUT_FILE};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scratch directory of the eager render, relative to the job.
const EAGER_SCRATCH: &str = "work/previews";

/// One entry of a preview listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPage {
    pub page_number: usize,
    pub image_url: String,
}

/// URL under which page `page` of `job` is served.
pub fn preview_url(job: &Job, page: usize) -> String {
    format!(
        "/previews/{}/{}/{}",
        job.id(),
        PREVIEWS_DIR,
        ArtifactRole::Preview(page).canonical_name()
    )
}

/// Renders and tracks preview thumbnails.
#[derive(Debug, Clone)]
pub struct PreviewMaterializer {
    invoker: Invoker,
    programs: ToolPrograms,
    dpi: u32,
    tracker: StateTracker,
}

impl PreviewMaterializer {
    pub fn new(invoker: Invoker, config: &ServiceConfig, tracker: StateTracker) -> Self {
        Self {
            invoker,
            programs: config.programs.clone(),
            dpi: config.preview_dpi,
            tracker,
        }
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    fn render_args(&self, first_last: Option<usize>, prefix: &str) -> Vec<String> {
        let mut args = vec!["-png".to_string(), "-r".to_string(), self.dpi.to_string()];
        if let Some(n) = first_last {
            args.extend(["-f".to_string(), n.to_string(), "-l".to_string(), n.to_string()]);
        }
        args.push(INPUT_FILE.to_string());
        args.push(prefix.to_string());
        args
    }

    /// Render every page of `job` and list the preview URLs.
    ///
    /// Fails only when the page count is unavailable or the job directory
    /// cannot be written. A failed render is logged; the affected pages are
    /// left to [`materialize`](Self::materialize).
    pub async fn render_all(&self, job: &Job) -> Result<Vec<PreviewPage>, PdfJobError> {
        let total = probe::page_count(
            &self.invoker,
            &self.programs,
            job.dir(),
            Path::new(INPUT_FILE),
            ProbeOrder::PdfinfoFirst,
        )
        .await?;
        job.ensure_subdir(PREVIEWS_DIR).await?;
        let scratch = job.ensure_subdir(EAGER_SCRATCH).await?;

        let prefix = format!("{EAGER_SCRATCH}/page");
        if let Err(e) = self
            .invoker
            .run(job.dir(), &self.programs.pdftoppm, self.render_args(None, &prefix))
            .await
        {
            warn!("Job {}: preview render failed, pages will render on demand: {}", job.id(), e);
        }

        let mut ready = 0usize;
        for page in 1..=total {
            let role = ArtifactRole::Preview(page);
            let mut slot = self.tracker.acquire(job.id(), role).await;
            match publish(&scratch, job.dir(), role).await {
                Ok(path) => {
                    *slot = ArtifactState::Done(path);
                    ready += 1;
                }
                Err(e) => debug!("Job {}: no eager preview for page {}: {}", job.id(), page, e),
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            debug!("Could not remove {}: {}", scratch.display(), e);
        }
        info!("Job {}: {}/{} previews rendered", job.id(), ready, total);

        Ok((1..=total)
            .map(|page| PreviewPage {
                page_number: page,
                image_url: preview_url(job, page),
            })
            .collect())
    }

    /// Make sure `previews/page-<page>.png` exists, rendering it if needed.
    pub async fn materialize(&self, job: &Job, page: usize) -> Result<PathBuf, PdfJobError> {
        if page == 0 {
            return Err(PdfJobError::invalid("page numbers start at 1"));
        }
        let role = ArtifactRole::Preview(page);
        let mut slot = self.tracker.acquire(job.id(), role).await;

        // Present under any known name: adopt it.
        if let Ok(path) = role.canonicalize_in(job.dir()).await {
            *slot = ArtifactState::Done(path.clone());
            return Ok(path);
        }

        if let ArtifactState::Failed(ref reason) = *slot {
            debug!("Job {}: retrying {} after earlier failure: {}", job.id(), role, reason);
        }
        *slot = ArtifactState::InProgress;
        match self.render_one(job, role).await {
            Ok(path) => {
                *slot = ArtifactState::Done(path.clone());
                Ok(path)
            }
            Err(e) => {
                warn!("Job {}: lazy preview of page {} failed: {}", job.id(), page, e);
                *slot = ArtifactState::Failed(e.to_string());
                drop(slot);
                if self.past_last_page(job, page).await {
                    self.tracker.forget(job.id(), role);
                }
                Err(e)
            }
        }
    }

    /// Whether `page` lies beyond the document. Pages that can never render
    /// are not kept in the tracker.
    async fn past_last_page(&self, job: &Job, page: usize) -> bool {
        probe::page_count(
            &self.invoker,
            &self.programs,
            job.dir(),
            Path::new(INPUT_FILE),
            ProbeOrder::PdfinfoFirst,
        )
        .await
        .map(|total| page > total)
        .unwrap_or(false)
    }

    async fn render_one(&self, job: &Job, role: ArtifactRole) -> Result<PathBuf, PdfJobError> {
        let page = role.page();
        let rel = format!("work/preview-{page}");
        let scratch = job.ensure_subdir(&rel).await?;
        job.ensure_subdir(PREVIEWS_DIR).await?;

        let prefix = format!("{rel}/page");
        self.invoker
            .run(
                job.dir(),
                &self.programs.pdftoppm,
                self.render_args(Some(page), &prefix),
            )
            .await
            .map_err(|e| PdfJobError::tool("render preview", e))?;

        let published = publish(&scratch, job.dir(), role).await;
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            debug!("Could not remove {}: {}", scratch.display(), e);
        }
        let path = published?;

        // Re-check once after the rename.
        if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(PdfJobError::ArtifactNotFound {
                role: role.to_string(),
                dir: job.previews_dir(),
            });
        }
        debug!("Job {}: rendered {}", job.id(), role);
        Ok(path)
    }
}

/// Move the rendered thumbnail for `role` from `scratch` to its canonical
/// location in the job.
async fn publish(scratch: &Path, job_dir: &Path, role: ArtifactRole) -> Result<PathBuf, PdfJobError> {
    let target = role.canonical_path(job_dir);
    if tokio::fs::metadata(&target).await.map(|m| m.is_file()).unwrap_or(false) {
        return Ok(target);
    }
    let found = naming::resolve(scratch, role.page(), &role.patterns())
        .await
        .map_err(|_| PdfJobError::ArtifactNotFound {
            role: role.to_string(),
            dir: scratch.to_path_buf(),
        })?;
    tokio::fs::rename(&found, &target)
        .await
        .map_err(|e| PdfJobError::io(&found, e))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::SystemRunner;
    use crate::workspace::Workspaces;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn materializer() -> PreviewMaterializer {
        let config = ServiceConfig::default();
        let invoker = Invoker::new(Arc::new(SystemRunner), &config);
        PreviewMaterializer::new(invoker, &config, StateTracker::new())
    }

    #[test]
    fn render_args_for_single_page() {
        let m = materializer();
        assert_eq!(
            m.render_args(Some(4), "work/preview-4/page"),
            vec!["-png", "-r", "110", "-f", "4", "-l", "4", "input.pdf", "work/preview-4/page"]
        );
        assert_eq!(m.render_args(None, "p").len(), 5);
    }

    #[tokio::test]
    async fn preview_urls_use_canonical_names() {
        let tmp = TempDir::new().unwrap();
        let job = Workspaces::new(tmp.path()).create_job().await.unwrap();
        assert_eq!(
            preview_url(&job, 3),
            format!("/previews/{}/previews/page-3.png", job.id())
        );
    }

    #[tokio::test]
    async fn existing_padded_preview_is_adopted_without_rendering() {
        let tmp = TempDir::new().unwrap();
        let job = Workspaces::new(tmp.path()).create_job().await.unwrap();
        job.ensure_subdir(PREVIEWS_DIR).await.unwrap();
        tokio::fs::write(job.previews_dir().join("page-07.png"), b"png")
            .await
            .unwrap();

        let m = materializer();
        let path = m.materialize(&job, 7).await.unwrap();
        assert_eq!(path, job.previews_dir().join("page-7.png"));
        assert!(m.tracker().get(job.id(), ArtifactRole::Preview(7)).is_done());
    }

    #[tokio::test]
    async fn page_zero_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let job = Workspaces::new(tmp.path()).create_job().await.unwrap();
        assert!(materializer().materialize(&job, 0).await.is_err());
    }
}
