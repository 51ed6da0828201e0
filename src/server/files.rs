//! Download and preview streaming.
//!
//! The wildcard capture arrives percent-decoded, so `%2e%2e` is refused
//! like a literal `..` and names with spaces resolve.

use super::{ApiError, AppState};
use crate::gateway::FileKind;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

pub async fn download(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    request: Request,
) -> Response {
    serve(state, FileKind::Download, &rest, request).await
}

pub async fn preview(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    request: Request,
) -> Response {
    serve(state, FileKind::Preview, &rest, request).await
}

async fn serve(state: AppState, kind: FileKind, rest: &str, request: Request) -> Response {
    let path = format!("{}{}", kind.prefix(), rest.trim_start_matches('/'));
    let file = match state.gateway.resolve(kind, &path).await {
        Ok(file) => file,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let mut response = match ServeFile::new(&file.path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    };
    if let Some(name) = file.attachment_name {
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', "_"));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}
