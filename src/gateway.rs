//! Maps client file paths to files under the storage root.
//!
//! ```text
//! /api/pdf/downloads/<job>/<file>   ──strip alias──►  /downloads/<job>/<file>
//!                                   ──strip family─►  <job>/<file>
//!                                   ──check segments, join root──►  <root>/<job>/<file>
//! ```
//!
//! A `..` segment anywhere is refused before the filesystem is touched.
//! Missing preview thumbnails of the form `<job>/previews/page-<n>.png` are
//! handed to the [`PreviewMaterializer`] instead of failing.

use crate::error::GatewayError;
use crate::naming::{parse_page_number, PREVIEWS_DIR};
use crate::preview::PreviewMaterializer;
use crate::workspace::Workspaces;
use std::path::PathBuf;
use tracing::debug;

/// Which route family a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `/downloads/...`, served as an attachment.
    Download,
    /// `/previews/...`, served inline, rendered on demand.
    Preview,
}

impl FileKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            FileKind::Download => "/downloads/",
            FileKind::Preview => "/previews/",
        }
    }
}

/// A file ready to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    /// Base name for `Content-Disposition: attachment`; `None` for inline.
    pub attachment_name: Option<String>,
}

/// Path resolution for downloads and previews.
#[derive(Debug, Clone)]
pub struct Gateway {
    workspaces: Workspaces,
    alias_prefix: String,
    previews: PreviewMaterializer,
}

impl Gateway {
    pub fn new(
        workspaces: Workspaces,
        alias_prefix: impl Into<String>,
        previews: PreviewMaterializer,
    ) -> Self {
        Self {
            workspaces,
            alias_prefix: alias_prefix.into(),
            previews,
        }
    }

    /// Strip the alias and family prefixes and split into clean segments.
    fn segments<'a>(&self, kind: FileKind, request_path: &'a str) -> Result<Vec<&'a str>, GatewayError> {
        let mut rest = request_path;
        if !self.alias_prefix.is_empty() {
            if let Some(stripped) = rest.strip_prefix(self.alias_prefix.as_str()) {
                if stripped.starts_with('/') {
                    rest = stripped;
                }
            }
        }
        let rest = rest
            .strip_prefix(kind.prefix())
            .or_else(|| rest.strip_prefix(kind.prefix().trim_start_matches('/')))
            .unwrap_or(rest);

        let mut segments = Vec::new();
        for segment in rest.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(GatewayError::Forbidden {
                        path: request_path.to_string(),
                    })
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(GatewayError::NotFound {
                path: request_path.to_string(),
            });
        }
        Ok(segments)
    }

    /// Resolve `request_path` (the full URL path) to a servable file.
    pub async fn resolve(&self, kind: FileKind, request_path: &str) -> Result<ResolvedFile, GatewayError> {
        let segments = self.segments(kind, request_path)?;
        let full = segments
            .iter()
            .fold(self.workspaces.root().to_path_buf(), |p, s| p.join(s));
        let attachment_name = match kind {
            FileKind::Download => segments.last().map(|s| s.to_string()),
            FileKind::Preview => None,
        };

        if is_file(&full).await {
            return Ok(ResolvedFile {
                path: full,
                attachment_name,
            });
        }

        let not_found = || GatewayError::NotFound {
            path: request_path.to_string(),
        };
        let lazy_page = match (kind, segments.as_slice()) {
            (FileKind::Preview, [job, dir, file]) if *dir == PREVIEWS_DIR => {
                parse_page_number(file, "page-", ".png").map(|n| (*job, n))
            }
            _ => None,
        };
        let Some((job_id, page)) = lazy_page else {
            return Err(not_found());
        };

        let job = self
            .workspaces
            .open_job(job_id)
            .await
            .map_err(|_| not_found())?;
        debug!("Preview {} missing, rendering page {}", request_path, page);
        let path = self.previews.materialize(&job, page).await?;
        Ok(ResolvedFile {
            path,
            attachment_name: None,
        })
    }
}

async fn is_file(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::state::StateTracker;
    use crate::tool::{Invoker, SystemRunner};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn gateway(root: &std::path::Path) -> Gateway {
        let config = ServiceConfig::default();
        let invoker = Invoker::new(Arc::new(SystemRunner), &config);
        let previews = PreviewMaterializer::new(invoker, &config, StateTracker::new());
        Gateway::new(Workspaces::new(root), "/api/pdf", previews)
    }

    #[tokio::test]
    async fn alias_and_family_prefixes_are_stripped() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("job1")).unwrap();
        std::fs::write(tmp.path().join("job1/out.pdf"), b"%PDF").unwrap();
        let gw = gateway(tmp.path());

        for p in ["/downloads/job1/out.pdf", "/api/pdf/downloads/job1/out.pdf", "/downloads/./job1//out.pdf"] {
            let file = gw.resolve(FileKind::Download, p).await.unwrap();
            assert_eq!(file.path, tmp.path().join("job1").join("out.pdf"));
            assert_eq!(file.attachment_name.as_deref(), Some("out.pdf"));
        }
    }

    #[tokio::test]
    async fn parent_segments_are_forbidden() {
        let tmp = TempDir::new().unwrap();
        let gw = gateway(tmp.path());
        for p in ["/downloads/../etc/passwd", "/api/pdf/previews/job/../../x", "/downloads/a\\..\\b"] {
            let err = gw.resolve(FileKind::Download, p).await.unwrap_err();
            assert!(matches!(err, GatewayError::Forbidden { .. }), "{p}: {err}");
        }
    }

    #[tokio::test]
    async fn directories_and_missing_files_are_not_found() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("job1/pages")).unwrap();
        let gw = gateway(tmp.path());
        for p in ["/downloads/job1/pages", "/downloads/job1/none.pdf", "/downloads/"] {
            let err = gw.resolve(FileKind::Download, p).await.unwrap_err();
            assert!(matches!(err, GatewayError::NotFound { .. }), "{p}: {err}");
        }
    }

    #[tokio::test]
    async fn preview_of_unknown_job_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let gw = gateway(tmp.path());
        let err = gw
            .resolve(FileKind::Preview, "/previews/nojob/previews/page-1.png")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn previews_are_inline() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("j/previews")).unwrap();
        std::fs::write(tmp.path().join("j/previews/page-1.png"), b"png").unwrap();
        let file = gateway(tmp.path())
            .resolve(FileKind::Preview, "/previews/j/previews/page-1.png")
            .await
            .unwrap();
        assert!(file.attachment_name.is_none());
    }
}
