//! Raster steps driven through ImageMagick `convert`.
//!
//! Two kinds of page task end up here:
//!
//! * **Overlays** (signatures, freeform annotations): every item for a page
//!   is composited onto one transparent canvas the size of the page, which
//!   is then image-stamped onto the page at the top-left corner.
//! * **Redaction**: the page is rasterised, black rectangles are painted
//!   over the pixels, and the image becomes the new single-page PDF. The
//!   original text under a rectangle does not survive.
//!
//! Coordinates arrive from the client as fractions (redaction) or
//! percentages (overlays) of the page, origin top-left.

use crate::error::PdfJobError;
use crate::naming::{self, NamePattern};
use crate::pipeline::TaskEnv;
use crate::tool::probe::{self, PageSize};
use base64::Engine;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

// ── Overlay items ────────────────────────────────────────────────────────

/// Box in percent of page width/height, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

/// One element composited into a page overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayItem {
    /// Decoded raster image scaled into `placement`. With `min_size`, boxes
    /// under 10 pt on a side fall back to 30 % of the page dimension.
    Image {
        bytes: Vec<u8>,
        placement: Placement,
        min_size: bool,
    },
    /// Text whose top-left corner sits at `(x, y)` percent.
    Text {
        content: String,
        x: f64,
        y: f64,
        font_size: u32,
        color: String,
    },
    /// Freehand stroke through points given in percent.
    Polyline { points: Vec<(f64, f64)>, color: String },
}

const HIGHLIGHT: &str = "#FFFF00";
const HIGHLIGHT_STROKE: &str = "#FFFF0080";
const FONT: &str = "DejaVu-Sans";

/// Decode a `data:image/...;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    if !url.starts_with("data:image") {
        return None;
    }
    let (_, payload) = url.split_once(',')?;
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
        .filter(|b| !b.is_empty())
}

fn escape_draw_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'").replace('"', "\\\"")
}

/// `convert` argv painting `items` on a transparent `size` canvas.
///
/// `image_paths[k]` is the file holding the bytes of `items[k]` when that
/// item is an image.
pub fn overlay_args(
    size: PageSize,
    items: &[OverlayItem],
    image_paths: &[Option<String>],
    output: &str,
) -> Vec<String> {
    let (pw, ph) = (size.width, size.height);
    let mut args = vec![
        "-size".to_string(),
        format!("{}x{}", pw as i64, ph as i64),
        "xc:none".to_string(),
    ];

    for (k, item) in items.iter().enumerate() {
        match item {
            OverlayItem::Image {
                placement,
                min_size,
                ..
            } => {
                let Some(Some(path)) = image_paths.get(k) else {
                    continue;
                };
                let mut w = (placement.width / 100.0 * pw) as i64;
                let mut h = (placement.height / 100.0 * ph) as i64;
                if *min_size {
                    if w < 10 {
                        w = (pw * 0.3) as i64;
                    }
                    if h < 10 {
                        h = (ph * 0.3) as i64;
                    }
                }
                let x = (placement.x / 100.0 * pw) as i64;
                let y = (placement.y / 100.0 * ph) as i64;
                args.extend([
                    "(".to_string(),
                    path.clone(),
                    "-resize".to_string(),
                    format!("{}x{}!", w.max(1), h.max(1)),
                    ")".to_string(),
                    "-geometry".to_string(),
                    format!("+{x}+{y}"),
                    "-composite".to_string(),
                ]);
            }
            OverlayItem::Text {
                content,
                x,
                y,
                font_size,
                color,
            } => {
                let px = (x / 100.0 * pw) as i64;
                let py = (y / 100.0 * ph) as i64 + i64::from(*font_size);
                args.extend([
                    "-stroke".to_string(),
                    "none".to_string(),
                    "-font".to_string(),
                    FONT.to_string(),
                    "-fill".to_string(),
                    color.clone(),
                    "-pointsize".to_string(),
                    font_size.to_string(),
                    "-draw".to_string(),
                    format!("text {px},{py} '{}'", escape_draw_text(content)),
                ]);
            }
            OverlayItem::Polyline { points, color } => {
                let highlight = color.eq_ignore_ascii_case(HIGHLIGHT);
                let (stroke, width) = if highlight {
                    (HIGHLIGHT_STROKE.to_string(), "12")
                } else {
                    (color.clone(), "3")
                };
                let path = points
                    .iter()
                    .map(|(x, y)| format!("{:.1},{:.1}", x / 100.0 * pw, y / 100.0 * ph))
                    .collect::<Vec<_>>()
                    .join(" ");
                args.extend([
                    "-stroke".to_string(),
                    stroke,
                    "-strokewidth".to_string(),
                    width.to_string(),
                    "-fill".to_string(),
                    "none".to_string(),
                    "-draw".to_string(),
                    format!("polyline {path}"),
                ]);
            }
        }
    }

    args.push(format!("PNG32:{output}"));
    args
}

/// Composite `items` into a transparent overlay the size of `source`.
///
/// Returns the overlay path relative to the job directory.
pub async fn render_overlay(
    env: &TaskEnv<'_>,
    items: &[OverlayItem],
    source: &str,
    step: &str,
) -> Result<String, PdfJobError> {
    let size = probe::page_size(env.invoker, env.programs, env.job_dir, Path::new(source)).await;

    let mut image_paths = Vec::with_capacity(items.len());
    for (k, item) in items.iter().enumerate() {
        match item {
            OverlayItem::Image { bytes, .. } => {
                let rel = env.scratch_file(&format!("img-{k}.png"));
                let abs = env.job_dir.join(&rel);
                tokio::fs::write(&abs, bytes)
                    .await
                    .map_err(|e| PdfJobError::io(&abs, e))?;
                image_paths.push(Some(rel));
            }
            _ => image_paths.push(None),
        }
    }

    let overlay = env.scratch_file("overlay.png");
    let args = overlay_args(size, items, &image_paths, &overlay);
    debug!(
        "Compositing {} overlay items on {}x{} canvas",
        items.len(),
        size.width,
        size.height
    );
    env.invoker
        .run(env.job_dir, &env.programs.convert, args)
        .await
        .map_err(|e| PdfJobError::tool(step, e))?;
    Ok(overlay)
}

// ── Redaction ────────────────────────────────────────────────────────────

/// Rectangle in fractions of the page, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RedactRect {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RedactRect {
    /// `-draw` primitive for an image of `w` x `h` pixels.
    pub fn draw_primitive(&self, w: u32, h: u32) -> String {
        let (w, h) = (f64::from(w), f64::from(h));
        let clamp = |v: f64| v.clamp(0.0, 1.0);
        let x1 = (clamp(self.x) * w) as i64;
        let y1 = (clamp(self.y) * h) as i64;
        let x2 = (clamp(self.x + self.width) * w) as i64;
        let y2 = (clamp(self.y + self.height) * h) as i64;
        format!("rectangle {x1},{y1} {x2},{y2}")
    }
}

/// Rasterise the single-page `source`, paint `rects` black and write the
/// image back as a single-page PDF at `output`.
pub async fn redact_page(
    env: &TaskEnv<'_>,
    rects: &[RedactRect],
    source: &str,
    output: &str,
    step: &str,
) -> Result<(), PdfJobError> {
    let dpi = env.redaction_dpi.to_string();
    let prefix = env.scratch_file("raster");
    env.invoker
        .run(
            env.job_dir,
            &env.programs.pdftoppm,
            ["-png", "-r", dpi.as_str(), "-f", "1", "-l", "1", source, prefix.as_str()],
        )
        .await
        .map_err(|e| PdfJobError::tool(step, e))?;

    let scratch_abs = env.job_dir.join(&env.scratch);
    let patterns = [
        NamePattern::unpadded("raster-", ".png"),
        NamePattern::padded("raster-", 2, ".png"),
    ];
    let raster = naming::canonicalize(&scratch_abs, 1, &patterns, "raster.png").await?;

    let (w, h) = {
        let path = raster.clone();
        tokio::task::spawn_blocking(move || image::image_dimensions(&path))
            .await
            .map_err(|e| PdfJobError::Internal(format!("dimension task failed: {e}")))?
            .map_err(|e| PdfJobError::Internal(format!("unreadable raster: {e}")))?
    };
    debug!("Redacting {} areas on {}x{} raster", rects.len(), w, h);

    let painted = env.scratch_file("redacted.png");
    let mut args = vec![env.scratch_file("raster.png"), "-fill".into(), "black".into()];
    for rect in rects {
        args.push("-draw".into());
        args.push(rect.draw_primitive(w, h));
    }
    args.push(painted.clone());
    env.invoker
        .run(env.job_dir, &env.programs.convert, args)
        .await
        .map_err(|e| PdfJobError::tool(step, e))?;

    env.invoker
        .run(
            env.job_dir,
            &env.programs.convert,
            ["-units", "PixelsPerInch", "-density", dpi.as_str(), painted.as_str(), output],
        )
        .await
        .map_err(|e| PdfJobError::tool(step, e))?;
    Ok(())
}
