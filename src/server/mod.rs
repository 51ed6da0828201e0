//! HTTP surface.
//!
//! ```text
//! GET  /health
//! POST {api}/preview | page-numbers | watermark | header-footer
//!      | add-header-footer | redact | sign | edit | organize
//! GET  /downloads/*   {alias}/downloads/*
//! GET  /previews/*    {alias}/previews/*
//! ```
//!
//! `{api}` is mounted at `/pdf` and at the configured alias (`/api/pdf` by
//! default). Uploads are multipart with the document in `file`. Errors are
//! `{"error": "<short message>"}` with the status derived from the error
//! category.

mod error;
mod files;
mod form;
mod handlers;

pub use error::ApiError;

use crate::config::ServiceConfig;
use crate::gateway::Gateway;
use crate::pipeline::PagePipeline;
use crate::preview::PreviewMaterializer;
use crate::state::StateTracker;
use crate::tool::{Invoker, ToolRunner};
use crate::workspace::{spawn_sweeper, Workspaces};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted request body.
pub const UPLOAD_LIMIT: usize = 64 << 20;

/// Shared handles behind every route.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub workspaces: Workspaces,
    pub pipeline: PagePipeline,
    pub previews: PreviewMaterializer,
    pub gateway: Gateway,
}

impl AppState {
    /// Wire the core components around one tool runner.
    pub fn new(config: ServiceConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let invoker = Invoker::new(runner, &config);
        let workspaces = Workspaces::new(config.storage_root.clone());
        let previews = PreviewMaterializer::new(invoker.clone(), &config, StateTracker::new());
        let gateway = Gateway::new(
            workspaces.clone(),
            config.alias_prefix.clone(),
            previews.clone(),
        );
        Self {
            pipeline: PagePipeline::new(invoker, &config),
            config: Arc::new(config),
            workspaces,
            previews,
            gateway,
        }
    }

    pub fn tracker(&self) -> &StateTracker {
        self.previews.tracker()
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/preview", post(handlers::preview))
        .route("/page-numbers", post(handlers::page_numbers))
        .route("/watermark", post(handlers::watermark))
        .route("/header-footer", post(handlers::header_footer))
        .route("/add-header-footer", post(handlers::header_footer))
        .route("/redact", post(handlers::redact))
        .route("/sign", post(handlers::sign))
        .route("/edit", post(handlers::edit))
        .route("/organize", post(handlers::organize))
}

fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/downloads/*path", get(files::download))
        .route("/previews/*path", get(files::preview))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let alias = state.config.alias_prefix.clone();
    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .nest("/pdf", api_routes())
        .merge(file_routes());
    if !alias.is_empty() && alias != "/pdf" {
        app = app.nest(&alias, api_routes().merge(file_routes()));
    }

    app.layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `addr` with the retention sweeper running until `shutdown`
/// turns true.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    state
        .workspaces
        .ensure_root()
        .await
        .map_err(std::io::Error::other)?;

    let sweeper = spawn_sweeper(
        state.workspaces.clone(),
        state.config.sweep_interval,
        state.config.retention,
        state.tracker().clone(),
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "Listening on {} (storage root {})",
        listener.local_addr()?,
        state.workspaces.root().display()
    );

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

    sweeper.abort();
    result
}
