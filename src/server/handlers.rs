//! Operation endpoints.
//!
//! Every handler validates its fields before a job directory is created,
//! so a bad request leaves nothing behind on disk.

use super::form::{Upload, UploadForm};
use super::{ApiError, AppState};
use crate::config::PageSelection;
use crate::pipeline::ops::{
    Align, Annotation, HeaderFooter, Margin, PageNumbers, Redaction, SignaturePlacement, Watermark,
};
use crate::pipeline::rotate::{self, Rotation};
use crate::pipeline::stamp::Anchor;
use crate::pipeline::PageOperation;
use crate::preview::PreviewPage;
use crate::workspace::Job;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub pages: Vec<PreviewPage>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Create a job and store the upload as its `input.pdf`.
async fn new_job(state: &AppState, upload: Upload) -> Result<Job, ApiError> {
    let job = state.workspaces.create_job().await?;
    job.save_input(upload.bytes.to_vec()).await?;
    Ok(job)
}

/// Shared flow of the per-page operations.
async fn run_operation(
    state: &AppState,
    upload: Upload,
    op: &dyn PageOperation,
) -> Result<Json<DownloadResponse>, ApiError> {
    let output_name = Job::output_name(&upload.file_name, op.output_suffix());
    let job = new_job(state, upload).await?;
    state.pipeline.run(&job, op, &output_name).await?;
    Ok(Json(DownloadResponse {
        download_url: job.download_url(&output_name),
    }))
}

fn page_range(form: &UploadForm) -> PageSelection {
    PageSelection::from_bounds(form.int("fromPage", 1), form.int("toPage", 0))
}

pub async fn preview(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PreviewResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let job = new_job(&state, upload).await?;
    let pages = state.previews.render_all(&job).await?;
    Ok(Json(PreviewResponse { pages }))
}

pub async fn page_numbers(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let op = PageNumbers::new()
        .anchor(Anchor::from_code(form.text("position")).unwrap_or(Anchor::BottomCenter))
        .font_size(form.int("fontSize", 10))
        .opacity(form.float("opacity", 0.95))
        .start_at(form.int("startAt", 1))
        .margin(Margin::parse(form.text("margin")));
    run_operation(&state, upload, &op).await
}

pub async fn watermark(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let text = form.text("text");
    if text.is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }
    let op = Watermark::new(text)
        .rotation(form.int("rotation", 45) as i32)
        .opacity(form.float("opacity", 0.25))
        .color(form.text("color"))
        .layer(form.text("layer"))
        .pages(page_range(&form));
    run_operation(&state, upload, &op).await
}

pub async fn header_footer(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let op = HeaderFooter::new()
        .header(form.text("headerText"), Align::parse(form.text("headerAlign")))
        .footer(form.text("footerText"), Align::parse(form.text("footerAlign")))
        .font_size(form.int("fontSize", 12))
        .margin(Margin::parse(form.text("margin")))
        .pages(page_range(&form));
    if op.layers().is_empty() {
        return Err(ApiError::bad_request("header or footer text is required"));
    }
    run_operation(&state, upload, &op).await
}

pub async fn redact(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let op = Redaction::from_json(form.raw("redactions"))?;
    run_operation(&state, upload, &op).await
}

pub async fn sign(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let op = SignaturePlacement::from_json(form.raw("signatures"))?;
    run_operation(&state, upload, &op).await
}

pub async fn edit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let op = Annotation::from_json(form.raw("annotations"))?;
    run_operation(&state, upload, &op).await
}

pub async fn organize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let order = form.text("order").to_string();
    if order.is_empty() {
        return Err(ApiError::bad_request("order is required"));
    }
    let rotations = Rotation::list_from_json(form.raw("rotations"))?;

    let output_name = Job::output_name(&upload.file_name, "organized");
    let job = new_job(&state, upload).await?;
    rotate::organize(
        state.pipeline.invoker(),
        state.pipeline.programs(),
        &job,
        &rotations,
        &order,
        &output_name,
    )
    .await?;
    Ok(Json(DownloadResponse {
        download_url: job.download_url(&output_name),
    }))
}
