//! Reconciles the file names external tools actually write with the
//! canonical names the rest of the crate expects.
//!
//! Splitters and rasterisers do not agree on how to name per-page output:
//! `pdfcpu extract` writes `input_page_3.pdf` (or `page_3.pdf`, or
//! `<stem>_page_3.pdf` depending on version and input name), and `pdftoppm`
//! zero-pads the page index to the digit count of the document length
//! (`page-03.png` for a 12-page file). Callers describe the possible names of
//! an artifact as a list of [`NamePattern`]s and let [`resolve`] and
//! [`canonicalize`] find and rename the file.
//!
//! ## Properties
//!
//! * **Deterministic.** When several files match, the lexicographically
//!   smallest is chosen, so two runs over the same directory agree.
//! * **Idempotent.** [`canonicalize`] on an already-canonical file returns
//!   it untouched.
//! * **Atomic.** The canonical name only ever appears through a `rename`,
//!   never through a partial write.

use crate::error::PdfJobError;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

// ── Patterns ─────────────────────────────────────────────────────────────

/// One way a tool may name the artifact of page `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    /// `<prefix><n><suffix>`, e.g. `page-7.png`.
    Unpadded { prefix: String, suffix: String },
    /// `<prefix><n zero-padded to width><suffix>`, e.g. `page-007.png`.
    Padded {
        prefix: String,
        width: usize,
        suffix: String,
    },
    /// Any file whose name ends in `<tail><n><suffix>`, e.g. `*_page_7.pdf`.
    /// Only checked by the directory scan.
    AnyEndingIn { tail: String, suffix: String },
}

impl NamePattern {
    pub fn unpadded(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        NamePattern::Unpadded {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn padded(prefix: impl Into<String>, width: usize, suffix: impl Into<String>) -> Self {
        NamePattern::Padded {
            prefix: prefix.into(),
            width,
            suffix: suffix.into(),
        }
    }

    pub fn any_ending_in(tail: impl Into<String>, suffix: impl Into<String>) -> Self {
        NamePattern::AnyEndingIn {
            tail: tail.into(),
            suffix: suffix.into(),
        }
    }

    /// The exact file name this pattern predicts for `page`, if it predicts one.
    pub fn render(&self, page: usize) -> Option<String> {
        match self {
            NamePattern::Unpadded { prefix, suffix } => Some(format!("{prefix}{page}{suffix}")),
            NamePattern::Padded {
                prefix,
                width,
                suffix,
            } => Some(format!("{prefix}{page:0width$}{suffix}", width = *width)),
            NamePattern::AnyEndingIn { .. } => None,
        }
    }

    fn prefix_and_suffix(&self) -> (&str, &str) {
        match self {
            NamePattern::Unpadded { prefix, suffix } | NamePattern::Padded { prefix, suffix, .. } => {
                (prefix.as_str(), suffix.as_str())
            }
            NamePattern::AnyEndingIn { tail, suffix } => (tail.as_str(), suffix.as_str()),
        }
    }

    /// Whether `file_name` could be this pattern's output for `page`,
    /// regardless of padding width.
    fn matches_loosely(&self, file_name: &str, page: usize) -> bool {
        let (prefix, suffix) = self.prefix_and_suffix();
        match self {
            NamePattern::AnyEndingIn { .. } => file_name.ends_with(&format!("{prefix}{page}{suffix}")),
            _ => parse_page_number(file_name, prefix, suffix) == Some(page),
        }
    }
}

/// Extract the page index from `<prefix><digits><ext>`, ignoring zero padding.
///
/// Returns `None` for any other shape and for page 0.
///
/// ```rust
/// use edgequake_pdfjobs::naming::parse_page_number;
///
/// assert_eq!(parse_page_number("page-007.png", "page-", ".png"), Some(7));
/// assert_eq!(parse_page_number("page-x.png", "page-", ".png"), None);
/// ```
pub fn parse_page_number(file_name: &str, prefix: &str, ext: &str) -> Option<usize> {
    let re = Regex::new(&format!(
        r"^{}(\d+){}$",
        regex::escape(prefix),
        regex::escape(ext)
    ))
    .ok()?;
    re.captures(file_name)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|&n| n > 0)
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Find the file holding page `page` in `dir`.
///
/// Exact candidates are tried in pattern order first. If none exists, the
/// directory is scanned for any regular file matching a pattern for this
/// page under any padding, and the lexicographically smallest name wins.
pub async fn resolve(
    dir: &Path,
    page: usize,
    patterns: &[NamePattern],
) -> Result<PathBuf, PdfJobError> {
    for pattern in patterns {
        if let Some(name) = pattern.render(page) {
            let candidate = dir.join(&name);
            if is_file(&candidate).await {
                return Ok(candidate);
            }
        }
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PdfJobError::io(dir, e))?;
    let mut best: Option<String> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PdfJobError::io(dir, e))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !patterns.iter().any(|p| p.matches_loosely(&name, page)) {
            continue;
        }
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if best.as_deref().is_none_or(|b| name.as_str() < b) {
            best = Some(name);
        }
    }

    match best {
        Some(name) => {
            debug!("Resolved page {} to {} by directory scan", page, name);
            Ok(dir.join(name))
        }
        None => Err(PdfJobError::ArtifactNotFound {
            role: format!("page {page}"),
            dir: dir.to_path_buf(),
        }),
    }
}

/// Resolve page `page` and rename it to `canonical` inside `dir`.
///
/// Returns the canonical path. A file already at the canonical name is
/// returned as is.
pub async fn canonicalize(
    dir: &Path,
    page: usize,
    patterns: &[NamePattern],
    canonical: &str,
) -> Result<PathBuf, PdfJobError> {
    let target = dir.join(canonical);
    if is_file(&target).await {
        return Ok(target);
    }

    let found = resolve(dir, page, patterns).await?;
    if found != target {
        tokio::fs::rename(&found, &target)
            .await
            .map_err(|e| PdfJobError::io(&found, e))?;
        debug!("Renamed {} -> {}", found.display(), canonical);
    }
    Ok(target)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

// ── Artifact roles ───────────────────────────────────────────────────────

/// Subdirectory holding split single-page sources.
pub const PAGES_DIR: &str = "pages";
/// Subdirectory holding transformed single-page outputs.
pub const STAMPED_DIR: &str = "stamped";
/// Subdirectory holding preview thumbnails.
pub const PREVIEWS_DIR: &str = "previews";

/// What a per-page file is for. Each role has one canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    /// Single-page PDF split from the input.
    PageSource(usize),
    /// Transformed single-page PDF, ready to merge.
    PageOutput(usize),
    /// PNG thumbnail served to the client.
    Preview(usize),
}

impl ArtifactRole {
    pub fn page(&self) -> usize {
        match *self {
            ArtifactRole::PageSource(n) | ArtifactRole::PageOutput(n) | ArtifactRole::Preview(n) => n,
        }
    }

    /// Job subdirectory the artifact lives in.
    pub fn subdir(&self) -> &'static str {
        match self {
            ArtifactRole::PageSource(_) => PAGES_DIR,
            ArtifactRole::PageOutput(_) => STAMPED_DIR,
            ArtifactRole::Preview(_) => PREVIEWS_DIR,
        }
    }

    pub fn canonical_name(&self) -> String {
        match *self {
            ArtifactRole::PageSource(n) => format!("page_{n}.pdf"),
            ArtifactRole::PageOutput(n) => format!("stamped-{n:04}.pdf"),
            ArtifactRole::Preview(n) => format!("page-{n}.png"),
        }
    }

    /// Every name the producing tool has been seen to use.
    pub fn patterns(&self) -> Vec<NamePattern> {
        match self {
            ArtifactRole::PageSource(_) => vec![
                NamePattern::unpadded("input_page_", ".pdf"),
                NamePattern::unpadded("page_", ".pdf"),
                NamePattern::any_ending_in("_page_", ".pdf"),
            ],
            ArtifactRole::PageOutput(_) => vec![NamePattern::padded("stamped-", 4, ".pdf")],
            ArtifactRole::Preview(_) => {
                let mut v = vec![NamePattern::unpadded("page-", ".png")];
                v.extend((2..=5).map(|w| NamePattern::padded("page-", w, ".png")));
                v
            }
        }
    }

    /// Canonical path of this artifact under `job_dir`.
    pub fn canonical_path(&self, job_dir: &Path) -> PathBuf {
        job_dir.join(self.subdir()).join(self.canonical_name())
    }

    /// Locate the artifact under `job_dir` and rename it to its canonical name.
    pub async fn canonicalize_in(&self, job_dir: &Path) -> Result<PathBuf, PdfJobError> {
        let dir = job_dir.join(self.subdir());
        canonicalize(&dir, self.page(), &self.patterns(), &self.canonical_name())
            .await
            .map_err(|e| match e {
                PdfJobError::ArtifactNotFound { dir, .. } => PdfJobError::ArtifactNotFound {
                    role: self.to_string(),
                    dir,
                },
                other => other,
            })
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRole::PageSource(n) => write!(f, "page {n} source"),
            ArtifactRole::PageOutput(n) => write!(f, "page {n} output"),
            ArtifactRole::Preview(n) => write!(f, "page {n} preview"),
        }
    }
}
