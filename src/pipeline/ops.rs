//! The page operations.
//!
//! | Operation | Task per page | Output suffix |
//! |-----------|---------------|---------------|
//! | [`PageNumbers`] | one text stamp with the page label | `numbered` |
//! | [`Watermark`] | one text stamp or watermark, selected pages | `watermarked` |
//! | [`HeaderFooter`] | up to two text stamps, selected pages | `headerfooter` |
//! | [`Redaction`] | raster + black rectangles, pages with areas | `redacted` |
//! | [`SignaturePlacement`] | image overlay, pages with signatures | `signed` |
//! | [`Annotation`] | text/image/drawing overlay, pages with items | `edited` |
//!
//! Structured parameters (redactions, signatures, annotations) arrive as
//! JSON strings and are parsed here. A parse failure becomes
//! [`PdfJobError::MalformedParameter`] whose public message never carries
//! the serde error text.

use crate::config::PageSelection;
use crate::error::PdfJobError;
use crate::pipeline::overlay::{decode_data_url, OverlayItem, Placement, RedactRect};
use crate::pipeline::stamp::{Anchor, Rgb, StampDescriptor, StampKind, StampLayer};
use crate::pipeline::{PageOperation, PipelineContext, TaskParams};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Margin preset shared by the text-stamp operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Margin {
    Small,
    #[default]
    Medium,
    Large,
}

impl Margin {
    /// `small` and `large` are recognised; anything else is medium.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "small" => Margin::Small,
            "large" => Margin::Large,
            _ => Margin::Medium,
        }
    }

    fn pick(self, [small, medium, large]: [i32; 3]) -> i32 {
        match self {
            Margin::Small => small,
            Margin::Medium => medium,
            Margin::Large => large,
        }
    }
}

fn parse_json<T: DeserializeOwned>(field: &str, raw: &str) -> Result<T, PdfJobError> {
    serde_json::from_str(raw).map_err(|e| PdfJobError::MalformedParameter {
        field: field.to_string(),
        detail: e.to_string(),
    })
}

// ── Page numbers ─────────────────────────────────────────────────────────

/// Stamp `start_at + i - 1` on page `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageNumbers {
    anchor: Anchor,
    font_size: u32,
    opacity: f64,
    start_at: u64,
    margin: Margin,
}

impl Default for PageNumbers {
    fn default() -> Self {
        Self {
            anchor: Anchor::BottomCenter,
            font_size: 10,
            opacity: 0.95,
            start_at: 1,
            margin: Margin::Medium,
        }
    }
}

impl PageNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Clamped to 6..=72 points.
    pub fn font_size(mut self, size: i64) -> Self {
        self.font_size = size.clamp(6, 72) as u32;
        self
    }

    /// Clamped to 0..=1.
    pub fn opacity(mut self, opacity: f64) -> Self {
        self.opacity = if opacity.is_nan() { 0.95 } else { opacity.clamp(0.0, 1.0) };
        self
    }

    /// Label of the first page; values below 1 become 1.
    pub fn start_at(mut self, start: i64) -> Self {
        self.start_at = start.max(1) as u64;
        self
    }

    pub fn margin(mut self, margin: Margin) -> Self {
        self.margin = margin;
        self
    }

    pub fn label(&self, page: usize) -> String {
        (self.start_at + page as u64 - 1).to_string()
    }

    pub fn descriptor(&self) -> StampDescriptor {
        let m = self.margin.pick([10, 20, 40]);
        let dy = if self.anchor.is_top() { -m } else { m };
        StampDescriptor {
            anchor: self.anchor,
            offset: Some((0, dy)),
            points: Some(self.font_size),
            opacity: Some(self.opacity),
            fill: Some(Rgb::gray(0.15)),
            ..StampDescriptor::default()
        }
    }
}

impl PageOperation for PageNumbers {
    fn name(&self) -> &'static str {
        "page-numbers"
    }

    fn action(&self) -> &'static str {
        "add page numbers"
    }

    fn output_suffix(&self) -> &'static str {
        "numbered"
    }

    fn task_params(&self, page: usize, _ctx: &PipelineContext) -> Option<TaskParams> {
        Some(TaskParams::Stamp(vec![StampLayer::text(
            self.label(page),
            self.descriptor(),
        )]))
    }
}

// ── Watermark ────────────────────────────────────────────────────────────

/// Rotated, translucent text across the centre of selected pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    text: String,
    rotation: i32,
    opacity: f64,
    color: Option<Rgb>,
    kind: StampKind,
    pages: PageSelection,
}

impl Watermark {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            rotation: 45,
            opacity: 0.25,
            color: None,
            kind: StampKind::Watermark,
            pages: PageSelection::All,
        }
    }

    /// Clockwise degrees, as the client sees them.
    pub fn rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.opacity = if opacity.is_nan() { 0.25 } else { opacity.clamp(0.0, 1.0) };
        self
    }

    /// `#rrggbb`; anything unparsable keeps the default grey.
    pub fn color(mut self, hex: &str) -> Self {
        self.color = Rgb::from_hex(hex);
        self
    }

    /// `over` puts the text above page content; anything else behind it.
    pub fn layer(mut self, layer: &str) -> Self {
        self.kind = if layer.trim() == "over" {
            StampKind::Stamp
        } else {
            StampKind::Watermark
        };
        self
    }

    pub fn pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    pub fn descriptor(&self) -> StampDescriptor {
        StampDescriptor {
            anchor: Anchor::Center,
            points: Some(48),
            rotation: -self.rotation,
            opacity: Some(self.opacity),
            fill: Some(self.color.unwrap_or(Rgb::gray(0.5))),
            ..StampDescriptor::default()
        }
    }
}

impl PageOperation for Watermark {
    fn name(&self) -> &'static str {
        "watermark"
    }

    fn action(&self) -> &'static str {
        "add watermark"
    }

    fn output_suffix(&self) -> &'static str {
        "watermarked"
    }

    fn prepare(&self, _ctx: &PipelineContext) -> Result<(), PdfJobError> {
        if self.text.is_empty() {
            return Err(PdfJobError::invalid("text is required"));
        }
        Ok(())
    }

    fn task_params(&self, page: usize, ctx: &PipelineContext) -> Option<TaskParams> {
        if !self.pages.contains(page, ctx.total_pages) {
            return None;
        }
        let mut layer = StampLayer::text(self.text.clone(), self.descriptor());
        layer.kind = self.kind;
        Some(TaskParams::Stamp(vec![layer]))
    }
}

// ── Header / footer ──────────────────────────────────────────────────────

/// Horizontal alignment of a header or footer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    Left,
    #[default]
    Center,
    Right,
}

impl Align {
    /// `left` and `right` are recognised; anything else centres.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "left" => Align::Left,
            "right" => Align::Right,
            _ => Align::Center,
        }
    }

    fn header_anchor(self) -> Anchor {
        match self {
            Align::Left => Anchor::TopLeft,
            Align::Center => Anchor::TopCenter,
            Align::Right => Anchor::TopRight,
        }
    }

    fn footer_anchor(self) -> Anchor {
        match self {
            Align::Left => Anchor::BottomLeft,
            Align::Center => Anchor::BottomCenter,
            Align::Right => Anchor::BottomRight,
        }
    }
}

/// A header line, a footer line, or both, on selected pages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderFooter {
    header: Option<(String, Align)>,
    footer: Option<(String, Align)>,
    font_size: u32,
    margin: Margin,
    pages: PageSelection,
}

impl HeaderFooter {
    pub fn new() -> Self {
        Self {
            font_size: 12,
            ..Self::default()
        }
    }

    /// Empty text leaves the header off.
    pub fn header(mut self, text: &str, align: Align) -> Self {
        let text = text.trim();
        self.header = (!text.is_empty()).then(|| (text.to_string(), align));
        self
    }

    /// Empty text leaves the footer off.
    pub fn footer(mut self, text: &str, align: Align) -> Self {
        let text = text.trim();
        self.footer = (!text.is_empty()).then(|| (text.to_string(), align));
        self
    }

    pub fn font_size(mut self, size: i64) -> Self {
        self.font_size = size.clamp(1, 200) as u32;
        self
    }

    pub fn margin(mut self, margin: Margin) -> Self {
        self.margin = margin;
        self
    }

    pub fn pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    fn line(&self, text: &str, anchor: Anchor, dy: i32) -> StampLayer {
        StampLayer::text(
            text,
            StampDescriptor {
                anchor,
                offset: Some((0, dy)),
                points: Some(self.font_size),
                opacity: Some(1.0),
                fill: Some(Rgb::gray(0.1)),
                ..StampDescriptor::default()
            },
        )
    }

    /// Header first, then footer.
    pub fn layers(&self) -> Vec<StampLayer> {
        let m = self.margin.pick([15, 25, 45]);
        let mut layers = Vec::with_capacity(2);
        if let Some((text, align)) = &self.header {
            layers.push(self.line(text, align.header_anchor(), -m));
        }
        if let Some((text, align)) = &self.footer {
            layers.push(self.line(text, align.footer_anchor(), m));
        }
        layers
    }
}

impl PageOperation for HeaderFooter {
    fn name(&self) -> &'static str {
        "header-footer"
    }

    fn action(&self) -> &'static str {
        "add header and footer"
    }

    fn output_suffix(&self) -> &'static str {
        "headerfooter"
    }

    fn prepare(&self, _ctx: &PipelineContext) -> Result<(), PdfJobError> {
        if self.header.is_none() && self.footer.is_none() {
            return Err(PdfJobError::invalid("header or footer text is required"));
        }
        Ok(())
    }

    fn task_params(&self, page: usize, ctx: &PipelineContext) -> Option<TaskParams> {
        if !self.pages.contains(page, ctx.total_pages) {
            return None;
        }
        Some(TaskParams::Stamp(self.layers()))
    }
}

// ── Redaction ────────────────────────────────────────────────────────────

/// Burn black rectangles into the pages they fall on.
#[derive(Debug, Clone, PartialEq)]
pub struct Redaction {
    by_page: BTreeMap<usize, Vec<RedactRect>>,
}

impl Redaction {
    pub fn new(rects: Vec<RedactRect>) -> Result<Self, PdfJobError> {
        if rects.is_empty() {
            return Err(PdfJobError::invalid("at least one redaction area required"));
        }
        let mut by_page: BTreeMap<usize, Vec<RedactRect>> = BTreeMap::new();
        for rect in rects {
            by_page.entry(rect.page).or_default().push(rect);
        }
        Ok(Self { by_page })
    }

    /// Parse the `redactions` form field.
    pub fn from_json(raw: &str) -> Result<Self, PdfJobError> {
        if raw.trim().is_empty() {
            return Err(PdfJobError::invalid("redactions JSON required"));
        }
        Self::new(parse_json("redactions", raw)?)
    }

    pub fn pages(&self) -> Vec<usize> {
        self.by_page.keys().copied().collect()
    }
}

impl PageOperation for Redaction {
    fn name(&self) -> &'static str {
        "redact"
    }

    fn action(&self) -> &'static str {
        "redact pages"
    }

    fn output_suffix(&self) -> &'static str {
        "redacted"
    }

    fn prepare(&self, ctx: &PipelineContext) -> Result<(), PdfJobError> {
        for page in self.by_page.keys() {
            if *page == 0 || *page > ctx.total_pages {
                warn!("Redaction area on page {} of {} ignored", page, ctx.total_pages);
            }
        }
        Ok(())
    }

    fn task_params(&self, page: usize, _ctx: &PipelineContext) -> Option<TaskParams> {
        self.by_page
            .get(&page)
            .map(|rects| TaskParams::Redact(rects.clone()))
    }

    fn linearize_output(&self) -> bool {
        true
    }
}

// ── Signatures ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacedSignatureJson {
    #[serde(default)]
    id: String,
    page: usize,
    #[serde(flatten)]
    placement: Placement,
    #[serde(default)]
    image_data: String,
}

/// Signature images placed at percentage coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SignaturePlacement {
    by_page: BTreeMap<usize, Vec<OverlayItem>>,
}

impl SignaturePlacement {
    /// Parse the `signatures` form field.
    ///
    /// Entries without a decodable `data:image` URL are skipped with a
    /// warning; at least one must remain.
    pub fn from_json(raw: &str) -> Result<Self, PdfJobError> {
        let parsed: Vec<PlacedSignatureJson> = if raw.trim().is_empty() {
            Vec::new()
        } else {
            parse_json("signatures", raw)?
        };

        let mut by_page: BTreeMap<usize, Vec<OverlayItem>> = BTreeMap::new();
        for sig in parsed {
            let Some(bytes) = decode_data_url(&sig.image_data) else {
                warn!("Skipping signature '{}': no usable image data", sig.id);
                continue;
            };
            by_page.entry(sig.page).or_default().push(OverlayItem::Image {
                bytes,
                placement: sig.placement,
                min_size: false,
            });
        }
        if by_page.is_empty() {
            return Err(PdfJobError::invalid("no signatures provided"));
        }
        Ok(Self { by_page })
    }
}

impl PageOperation for SignaturePlacement {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn action(&self) -> &'static str {
        "apply signatures"
    }

    fn output_suffix(&self) -> &'static str {
        "signed"
    }

    fn task_params(&self, page: usize, _ctx: &PipelineContext) -> Option<TaskParams> {
        self.by_page
            .get(&page)
            .map(|items| TaskParams::Overlay(items.clone()))
    }
}

// ── Annotations ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PointJson {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationJson {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    page: usize,
    #[serde(flatten)]
    placement: Placement,
    #[serde(default)]
    content: String,
    #[serde(default)]
    font_size: i64,
    #[serde(default)]
    color: String,
    #[serde(default)]
    image_data: String,
    #[serde(default)]
    drawing_path: Vec<PointJson>,
}

impl AnnotationJson {
    fn into_item(self) -> Option<OverlayItem> {
        let color = if self.color.trim().is_empty() {
            "#000000".to_string()
        } else {
            self.color
        };
        match self.kind.as_str() {
            "text" if !self.content.is_empty() => Some(OverlayItem::Text {
                content: self.content,
                x: self.placement.x,
                y: self.placement.y,
                font_size: if self.font_size < 8 {
                    16
                } else {
                    self.font_size.min(400) as u32
                },
                color,
            }),
            "image" => decode_data_url(&self.image_data).map(|bytes| OverlayItem::Image {
                bytes,
                placement: self.placement,
                min_size: true,
            }),
            "drawing" if self.drawing_path.len() > 1 => Some(OverlayItem::Polyline {
                points: self.drawing_path.iter().map(|p| (p.x, p.y)).collect(),
                color,
            }),
            _ => None,
        }
    }
}

/// Freeform edits: text, images, and drawings composited per page.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    by_page: BTreeMap<usize, Vec<OverlayItem>>,
}

impl Annotation {
    /// Parse the `annotations` form field. Items with nothing to draw are
    /// skipped; at least one must remain.
    pub fn from_json(raw: &str) -> Result<Self, PdfJobError> {
        let parsed: Vec<AnnotationJson> = if raw.trim().is_empty() {
            Vec::new()
        } else {
            parse_json("annotations", raw)?
        };

        let mut by_page: BTreeMap<usize, Vec<OverlayItem>> = BTreeMap::new();
        for ann in parsed {
            let (id, page) = (ann.id.clone(), ann.page);
            match ann.into_item() {
                Some(item) => by_page.entry(page).or_default().push(item),
                None => warn!("Skipping annotation '{}': nothing to draw", id),
            }
        }
        if by_page.is_empty() {
            return Err(PdfJobError::invalid("no annotations provided"));
        }
        Ok(Self { by_page })
    }
}

impl PageOperation for Annotation {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn action(&self) -> &'static str {
        "apply annotations"
    }

    fn output_suffix(&self) -> &'static str {
        "edited"
    }

    fn task_params(&self, page: usize, _ctx: &PipelineContext) -> Option<TaskParams> {
        self.by_page
            .get(&page)
            .map(|items| TaskParams::Overlay(items.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stamp::StampContent;
    use crate::workspace::JobId;

    fn ctx(total: usize) -> PipelineContext {
        PipelineContext {
            job_id: JobId::generate(),
            total_pages: total,
        }
    }

    fn single_layer(params: Option<TaskParams>) -> StampLayer {
        match params {
            Some(TaskParams::Stamp(mut layers)) if layers.len() == 1 => layers.remove(0),
            other => panic!("expected one stamp layer, got {other:?}"),
        }
    }

    #[test]
    fn page_numbers_label_and_descriptor() {
        let op = PageNumbers::new().start_at(5);
        let layer = single_layer(op.task_params(3, &ctx(3)));
        assert_eq!(layer.content, StampContent::Text("7".into()));
        assert_eq!(
            layer.descriptor.to_string(),
            "pos:bc, off:0 20, points:10, scale:1 abs, rot:0, op:0.95, fillc:0.15 0.15 0.15"
        );
    }

    #[test]
    fn page_numbers_clamp_and_top_offset() {
        let op = PageNumbers::new()
            .anchor(Anchor::TopRight)
            .font_size(200)
            .opacity(3.0)
            .start_at(-4)
            .margin(Margin::Large);
        assert_eq!(op.label(1), "1");
        let d = op.descriptor();
        assert_eq!(d.points, Some(72));
        assert_eq!(d.opacity, Some(1.0));
        assert_eq!(d.offset, Some((0, -40)));
        assert_eq!(PageNumbers::new().font_size(1).descriptor().points, Some(6));
    }

    #[test]
    fn watermark_negates_rotation_and_respects_range() {
        let op = Watermark::new("DRAFT")
            .rotation(30)
            .color("#ff0000")
            .layer("over")
            .pages(PageSelection::Range(2, 3));
        let c = ctx(4);
        assert!(op.task_params(1, &c).is_none());
        assert!(op.task_params(4, &c).is_none());
        let layer = single_layer(op.task_params(2, &c));
        assert_eq!(layer.kind, StampKind::Stamp);
        assert_eq!(
            layer.descriptor.to_string(),
            "pos:c, points:48, scale:1 abs, rot:-30, op:0.25, fillc:1.00 0.00 0.00"
        );
    }

    #[test]
    fn watermark_requires_text_and_defaults_to_background() {
        assert!(Watermark::new("   ").prepare(&ctx(1)).is_err());
        let layer = single_layer(Watermark::new("x").task_params(1, &ctx(1)));
        assert_eq!(layer.kind, StampKind::Watermark);
    }

    #[test]
    fn header_footer_layers_in_order() {
        let op = HeaderFooter::new()
            .header("Quarterly", Align::Left)
            .footer("Confidential", Align::parse("right"))
            .margin(Margin::Small);
        let layers = op.layers();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].content, StampContent::Text("Quarterly".into()));
        assert_eq!(
            layers[0].descriptor.to_string(),
            "pos:tl, off:0 -15, points:12, scale:1 abs, rot:0, op:1.00, fillc:0.10 0.10 0.10"
        );
        assert_eq!(layers[1].descriptor.anchor, Anchor::BottomRight);
        assert_eq!(layers[1].descriptor.offset, Some((0, 15)));
    }

    #[test]
    fn header_footer_needs_some_text() {
        let op = HeaderFooter::new().header("  ", Align::Center);
        let err = op.prepare(&ctx(1)).unwrap_err();
        assert_eq!(err.public_message(), "header or footer text is required");
        let footer_only = HeaderFooter::new().footer("p", Align::default());
        assert_eq!(footer_only.layers().len(), 1);
    }

    #[test]
    fn redaction_groups_by_page() {
        let op = Redaction::from_json(
            r#"[{"page":2,"x":0.1,"y":0.1,"width":0.2,"height":0.05},
                {"page":2,"x":0.5,"y":0.5,"width":0.1,"height":0.1}]"#,
        )
        .unwrap();
        assert_eq!(op.pages(), vec![2]);
        assert!(op.task_params(1, &ctx(3)).is_none());
        match op.task_params(2, &ctx(3)) {
            Some(TaskParams::Redact(rects)) => assert_eq!(rects.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(op.linearize_output());
    }

    #[test]
    fn malformed_json_is_input_error_without_serde_text() {
        let err = Redaction::from_json("{not json").unwrap_err();
        assert_eq!(err.public_message(), "invalid redactions");
        let err = Redaction::from_json("[]").unwrap_err();
        assert_eq!(err.public_message(), "at least one redaction area required");
    }

    #[test]
    fn signatures_skip_undecodable_entries() {
        let raw = r#"[
            {"id":"a","page":1,"x":10,"y":80,"width":30,"height":10,"imageData":"data:image/png;base64,iVBORw0KGgo="},
            {"id":"b","page":2,"x":0,"y":0,"width":1,"height":1,"imageData":"https://example.com/x.png"}
        ]"#;
        let op = SignaturePlacement::from_json(raw).unwrap();
        assert!(matches!(op.task_params(1, &ctx(2)), Some(TaskParams::Overlay(ref v)) if v.len() == 1));
        assert!(op.task_params(2, &ctx(2)).is_none());

        let err = SignaturePlacement::from_json(r#"[{"page":1,"x":0,"y":0,"imageData":""}]"#)
            .unwrap_err();
        assert_eq!(err.public_message(), "no signatures provided");
    }

    #[test]
    fn annotations_map_types() {
        let raw = r##"[
            {"id":"t","type":"text","page":1,"x":5,"y":5,"content":"Hi","fontSize":4},
            {"id":"d","type":"drawing","page":1,"x":0,"y":0,"color":"#FFFF00","drawingPath":[{"x":1,"y":1},{"x":2,"y":2}]},
            {"id":"e","type":"drawing","page":3,"x":0,"y":0,"drawingPath":[{"x":1,"y":1}]}
        ]"##;
        let op = Annotation::from_json(raw).unwrap();
        match op.task_params(1, &ctx(3)) {
            Some(TaskParams::Overlay(items)) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[0], OverlayItem::Text { font_size: 16, .. }));
                assert!(matches!(items[1], OverlayItem::Polyline { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(op.task_params(3, &ctx(3)).is_none());
    }
}
