//! Document probes: page count and page size.
//!
//! Both probes parse the human-readable reports of `pdfcpu info` and
//! `pdfinfo`. A page count needs one of the two tools to succeed; the page
//! size degrades to US Letter when it cannot be read.

use crate::config::ToolPrograms;
use crate::error::PdfJobError;
use crate::tool::Invoker;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

static PAGES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*Pages:\s+(\d+)").unwrap());

static PAGE_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Page size:\s+([\d.]+)\s+x\s+([\d.]+)\s+pts").unwrap());

/// US Letter in PDF points.
pub const LETTER: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

/// Which page counter to ask first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrder {
    /// `pdfcpu info`, then `pdfinfo`. Used by the page pipeline.
    PdfcpuFirst,
    /// `pdfinfo`, then `pdfcpu info`. Used by preview rendering.
    PdfinfoFirst,
}

/// Page dimensions in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// Extract a positive `Pages:` count from a tool report.
pub fn parse_page_count(report: &str) -> Option<usize> {
    PAGES_RE
        .captures(report)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// Extract the first `Page size: W x H pts` line from a `pdfinfo` report.
pub fn parse_page_size(report: &str) -> Option<PageSize> {
    let caps = PAGE_SIZE_RE.captures(report)?;
    let width = caps[1].parse::<f64>().ok()?;
    let height = caps[2].parse::<f64>().ok()?;
    (width > 0.0 && height > 0.0).then_some(PageSize { width, height })
}

/// Count the pages of `pdf` (relative to `dir` or absolute).
///
/// The fallback tool is only consulted when the first one fails or prints
/// no usable count. Both failing yields [`PdfJobError::PageCountUnavailable`].
pub async fn page_count(
    invoker: &Invoker,
    programs: &ToolPrograms,
    dir: &Path,
    pdf: &Path,
    order: ProbeOrder,
) -> Result<usize, PdfJobError> {
    let pdfcpu = [programs.pdfcpu.as_str(), "info"];
    let pdfinfo = [programs.pdfinfo.as_str()];
    let attempts: [&[&str]; 2] = match order {
        ProbeOrder::PdfcpuFirst => [&pdfcpu, &pdfinfo],
        ProbeOrder::PdfinfoFirst => [&pdfinfo, &pdfcpu],
    };

    for argv in attempts {
        let (program, leading) = (argv[0], &argv[1..]);
        let args = leading
            .iter()
            .map(|s| OsString::from(*s))
            .chain(std::iter::once(pdf.as_os_str().to_os_string()));
        match invoker.output(dir, program, args).await {
            Ok(report) => match parse_page_count(&report) {
                Some(n) => {
                    debug!("{} reports {} pages for {}", program, n, pdf.display());
                    return Ok(n);
                }
                None => warn!("{} printed no page count for {}", program, pdf.display()),
            },
            Err(e) => debug!("Page count via {} failed: {}", program, e),
        }
    }

    Err(PdfJobError::PageCountUnavailable {
        path: dir.join(pdf),
    })
}

/// Size of the first page of `pdf`, defaulting to [`LETTER`].
pub async fn page_size(
    invoker: &Invoker,
    programs: &ToolPrograms,
    dir: &Path,
    pdf: &Path,
) -> PageSize {
    match invoker
        .output(dir, &programs.pdfinfo, [pdf.as_os_str()])
        .await
    {
        Ok(report) => parse_page_size(&report).unwrap_or(LETTER),
        Err(e) => {
            debug!("Page size probe failed, assuming Letter: {}", e);
            LETTER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pdfcpu_and_pdfinfo_reports() {
        let pdfcpu = "PDF version: 1.7\n     Pages: 12\nTitle: x\n";
        assert_eq!(parse_page_count(pdfcpu), Some(12));

        let pdfinfo = "Producer:       LibreOffice\nPages:          3\nEncrypted:      no\n";
        assert_eq!(parse_page_count(pdfinfo), Some(3));
    }

    #[test]
    fn zero_or_missing_count_is_none() {
        assert_eq!(parse_page_count("Pages: 0\n"), None);
        assert_eq!(parse_page_count("Title: Pages: 4 in the title\n"), None);
        assert_eq!(parse_page_count(""), None);
    }

    #[test]
    fn parses_page_size() {
        let report = "Pages:          1\nPage size:      595.276 x 841.89 pts (A4)\n";
        let size = parse_page_size(report).unwrap();
        assert!((size.width - 595.276).abs() < 1e-6);
        assert!((size.height - 841.89).abs() < 1e-6);
        assert_eq!(parse_page_size("Pages: 1\n"), None);
    }
}
