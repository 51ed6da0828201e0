//! Whole-document organise: grouped rotations, then reorder/delete.
//!
//! Rotation does not go through the page pipeline. pdfcpu rotates a page
//! set in place, so pages are bucketed by normalised angle and each bucket
//! costs exactly one invocation against a working copy of the input.
//! `pdfcpu collect` then writes the requested page order to the output.

use crate::config::ToolPrograms;
use crate::error::PdfJobError;
use crate::tool::Invoker;
use crate::workspace::{Job, INPUT_FILE};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Name of the working copy that rotations modify in place.
const WORK_FILE: &str = "work.pdf";

/// Requested rotation of one page, clockwise degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub page_number: i64,
    pub degrees: i64,
}

impl Rotation {
    /// Parse the `rotations` form field. Blank means no rotations.
    pub fn list_from_json(raw: &str) -> Result<Vec<Rotation>, PdfJobError> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(raw).map_err(|e| PdfJobError::MalformedParameter {
            field: "rotations".to_string(),
            detail: e.to_string(),
        })
    }

    /// Angle folded into `0..360`.
    pub fn normalized(&self) -> i64 {
        self.degrees.rem_euclid(360)
    }
}

/// Bucket pages by angle. Only 90, 180, and 270 survive; zero and
/// non-right angles are dropped, as are non-positive page numbers. Pages
/// within a bucket come out sorted and deduplicated.
pub fn group_rotations(rotations: &[Rotation]) -> BTreeMap<u16, Vec<usize>> {
    let mut buckets: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
    for rot in rotations {
        let deg = rot.normalized();
        if !matches!(deg, 90 | 180 | 270) || rot.page_number <= 0 {
            continue;
        }
        buckets
            .entry(deg as u16)
            .or_default()
            .push(rot.page_number as usize);
    }
    for pages in buckets.values_mut() {
        pages.sort_unstable();
        pages.dedup();
    }
    buckets
}

/// `pdfcpu` argv rotating `pages` of `file` in place.
fn rotate_args(pages: &[usize], degrees: u16, file: &str) -> Vec<String> {
    let list = pages
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    vec![
        "rotate".into(),
        "-pages".into(),
        list,
        file.into(),
        format!("-{degrees}"),
    ]
}

/// Apply `rotations` and write the pages listed in `order` to `output_name`.
///
/// `order` is a pdfcpu page list (`3,1,2`, `1-4,6`); omitted pages are
/// deleted.
pub async fn organize(
    invoker: &Invoker,
    programs: &ToolPrograms,
    job: &Job,
    rotations: &[Rotation],
    order: &str,
    output_name: &str,
) -> Result<(), PdfJobError> {
    let order = order.trim();
    if order.is_empty() {
        return Err(PdfJobError::invalid("order is required"));
    }
    let start = Instant::now();
    let dir = job.dir();

    // ── Step 1: Working copy ─────────────────────────────────────────────
    let work = job.path(WORK_FILE);
    tokio::fs::copy(job.input_path(), &work)
        .await
        .map_err(|e| PdfJobError::io(&work, e))?;

    // ── Step 2: One rotate per angle ─────────────────────────────────────
    let buckets = group_rotations(rotations);
    for (deg, pages) in &buckets {
        debug!("Job {}: rotating pages {:?} by {}", job.id(), pages, deg);
        invoker
            .run(dir, &programs.pdfcpu, rotate_args(pages, *deg, WORK_FILE))
            .await
            .map_err(|e| PdfJobError::tool("rotate pages", e))?;
    }

    // ── Step 3: Collect in order ─────────────────────────────────────────
    invoker
        .run(
            dir,
            &programs.pdfcpu,
            ["collect", "-pages", order, WORK_FILE, output_name],
        )
        .await
        .map_err(|e| PdfJobError::tool("organize PDF", e))?;

    info!(
        "Job {}: organised {} (order {}, {} rotation groups) in {}ms",
        job.id(),
        INPUT_FILE,
        order,
        buckets.len(),
        start.elapsed().as_millis()
    );
    Ok(())
}
