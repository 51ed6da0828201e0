//! Service configuration.
//!
//! Every knob of the orchestration core lives in [`ServiceConfig`], built via
//! [`ServiceConfigBuilder`]. The storage root is an explicit value handed to
//! each component at construction time and never mutated afterwards; there
//! is no process-wide base path.
//!
//! # Example
//! ```rust
//! use edgequake_pdfjobs::ServiceConfig;
//! use std::time::Duration;
//!
//! let config = ServiceConfig::builder()
//!     .storage_root("/var/lib/pdfjobs")
//!     .retention(Duration::from_secs(2 * 3600))
//!     .sweep_interval(Duration::from_secs(30 * 60))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.preview_dpi, 110);
//! ```

use crate::error::PdfJobError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the job workspace service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory under which every job directory is created. Default: `./work`.
    pub storage_root: PathBuf,

    /// Jobs whose directory mtime is older than this are swept. Default: 2 h.
    ///
    /// Must exceed the longest realistic request; the sweep takes no lock
    /// against handlers still writing into a job.
    pub retention: Duration,

    /// Interval between two retention sweeps. Default: 30 min.
    pub sweep_interval: Duration,

    /// Wall-clock budget for page/document transforms. Default: 120 s.
    pub tool_timeout: Duration,

    /// Wall-clock budget for headless-browser rendering. Default: 60 s.
    pub browser_timeout: Duration,

    /// Resolution of preview thumbnails. Default: 110 DPI.
    pub preview_dpi: u32,

    /// Resolution used when rasterising pages for redaction. Default: 300 DPI.
    pub redaction_dpi: u32,

    /// Number of page tasks run at once. Default: 1 (sequential).
    ///
    /// Page tasks are independent, so values above 1 are safe; the merge
    /// order is always ascending page index.
    pub page_concurrency: usize,

    /// Names (or paths) of the external programs.
    pub programs: ToolPrograms,

    /// Optional prefix under which the API and file routes are mirrored.
    /// Default: `/api/pdf`.
    pub alias_prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("work"),
            retention: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
            tool_timeout: Duration::from_secs(120),
            browser_timeout: Duration::from_secs(60),
            preview_dpi: 110,
            redaction_dpi: 300,
            page_concurrency: 1,
            programs: ToolPrograms::default(),
            alias_prefix: "/api/pdf".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// External program names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPrograms {
    pub pdfcpu: String,
    pub pdfinfo: String,
    pub pdftoppm: String,
    pub qpdf: String,
    pub convert: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            pdfcpu: "pdfcpu".into(),
            pdfinfo: "pdfinfo".into(),
            pdftoppm: "pdftoppm".into(),
            qpdf: "qpdf".into(),
            convert: "convert".into(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn browser_timeout(mut self, timeout: Duration) -> Self {
        self.config.browser_timeout = timeout;
        self
    }

    pub fn preview_dpi(mut self, dpi: u32) -> Self {
        self.config.preview_dpi = dpi.clamp(36, 300);
        self
    }

    pub fn redaction_dpi(mut self, dpi: u32) -> Self {
        self.config.redaction_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn programs(mut self, programs: ToolPrograms) -> Self {
        self.config.programs = programs;
        self
    }

    pub fn alias_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.alias_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, PdfJobError> {
        let c = &self.config;
        if c.storage_root.as_os_str().is_empty() {
            return Err(PdfJobError::InvalidConfig(
                "storage root must not be empty".into(),
            ));
        }
        if c.retention.is_zero() {
            return Err(PdfJobError::InvalidConfig(
                "retention must be greater than zero".into(),
            ));
        }
        if c.sweep_interval.is_zero() {
            return Err(PdfJobError::InvalidConfig(
                "sweep interval must be greater than zero".into(),
            ));
        }
        if c.tool_timeout.is_zero() || c.browser_timeout.is_zero() {
            return Err(PdfJobError::InvalidConfig(
                "tool timeouts must be greater than zero".into(),
            ));
        }
        if !c.alias_prefix.is_empty()
            && (!c.alias_prefix.starts_with('/') || c.alias_prefix.ends_with('/'))
        {
            return Err(PdfJobError::InvalidConfig(format!(
                "alias prefix must start with '/' and not end with '/', got '{}'",
                c.alias_prefix
            )));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Which pages a per-page operation touches. Unselected pages pass through
/// the pipeline unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range (1-indexed, inclusive). An `end` of 0 means
    /// "through the last page".
    Range(usize, usize),
}

impl PageSelection {
    /// Build a selection from the `fromPage`/`toPage` form convention:
    /// non-positive `to` means the last page, `from` below 1 means page 1.
    pub fn from_bounds(from: i64, to: i64) -> Self {
        let from = from.max(1) as usize;
        let to = if to <= 0 { 0 } else { to as usize };
        if from == 1 && to == 0 {
            PageSelection::All
        } else {
            PageSelection::Range(from, to)
        }
    }

    /// Whether the 1-indexed `page` is selected in a document of `total` pages.
    pub fn contains(&self, page: usize, total: usize) -> bool {
        if page == 0 || page > total {
            return false;
        }
        match self {
            PageSelection::All => true,
            PageSelection::Single(p) => *p == page,
            PageSelection::Range(start, end) => {
                let end = if *end == 0 { total } else { (*end).min(total) };
                page >= (*start).max(1) && page <= end
            }
        }
    }
}
