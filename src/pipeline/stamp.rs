//! Structured stamp descriptors and the `pdfcpu stamp`/`watermark` step.
//!
//! pdfcpu configures a stamp with a comma-separated descriptor string such
//! as `pos:bc, off:0 20, points:10, scale:1 abs, rot:0, op:0.95`. Building
//! that string by hand at every call site invites typos and inconsistent
//! number formatting, so every operation fills in a [`StampDescriptor`] and
//! the single [`fmt::Display`] impl below renders it.

use crate::error::PdfJobError;
use crate::pipeline::TaskEnv;
use std::fmt;

// ── Descriptor parts ─────────────────────────────────────────────────────

/// Anchor position on the page (pdfcpu `pos:`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    pub fn code(&self) -> &'static str {
        match self {
            Anchor::TopLeft => "tl",
            Anchor::TopCenter => "tc",
            Anchor::TopRight => "tr",
            Anchor::Left => "l",
            Anchor::Center => "c",
            Anchor::Right => "r",
            Anchor::BottomLeft => "bl",
            Anchor::BottomCenter => "bc",
            Anchor::BottomRight => "br",
        }
    }

    /// Parse a pdfcpu position code (`tl`, `bc`, ...).
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code.trim() {
            "tl" => Anchor::TopLeft,
            "tc" => Anchor::TopCenter,
            "tr" => Anchor::TopRight,
            "l" => Anchor::Left,
            "c" => Anchor::Center,
            "r" => Anchor::Right,
            "bl" => Anchor::BottomLeft,
            "bc" => Anchor::BottomCenter,
            "br" => Anchor::BottomRight,
            _ => return None,
        })
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Anchor::TopLeft | Anchor::TopCenter | Anchor::TopRight)
    }
}

/// Fill colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn gray(level: f64) -> Self {
        Rgb {
            r: level,
            g: level,
            b: level,
        }
    }

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb {
            r: f64::from(channel(0)?) / 255.0,
            g: f64::from(channel(2)?) / 255.0,
            b: f64::from(channel(4)?) / 255.0,
        })
    }
}

/// A complete pdfcpu stamp descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct StampDescriptor {
    pub anchor: Anchor,
    /// Horizontal and vertical offset from the anchor, in points.
    pub offset: Option<(i32, i32)>,
    /// Font size in points (text stamps only).
    pub points: Option<u32>,
    /// Scale factor; always absolute so text size is exact.
    pub scale: f64,
    /// Rotation in degrees, counter-clockwise as pdfcpu expects.
    pub rotation: i32,
    pub opacity: Option<f64>,
    pub fill: Option<Rgb>,
}

impl Default for StampDescriptor {
    fn default() -> Self {
        Self {
            anchor: Anchor::Center,
            offset: None,
            points: None,
            scale: 1.0,
            rotation: 0,
            opacity: None,
            fill: None,
        }
    }
}

impl StampDescriptor {
    /// Full-page image overlay anchored at the top-left corner.
    pub fn full_page_overlay() -> Self {
        Self {
            anchor: Anchor::TopLeft,
            offset: Some((0, 0)),
            ..Self::default()
        }
    }
}

impl fmt::Display for StampDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos:{}", self.anchor.code())?;
        if let Some((x, y)) = self.offset {
            write!(f, ", off:{x} {y}")?;
        }
        if let Some(points) = self.points {
            write!(f, ", points:{points}")?;
        }
        write!(f, ", scale:{} abs, rot:{}", self.scale, self.rotation)?;
        if let Some(op) = self.opacity {
            write!(f, ", op:{op:.2}")?;
        }
        if let Some(c) = self.fill {
            write!(f, ", fillc:{:.2} {:.2} {:.2}", c.r, c.g, c.b)?;
        }
        Ok(())
    }
}

// ── Layers ───────────────────────────────────────────────────────────────

/// Foreground stamp or background watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StampKind {
    #[default]
    Stamp,
    Watermark,
}

impl StampKind {
    fn command(&self) -> &'static str {
        match self {
            StampKind::Stamp => "stamp",
            StampKind::Watermark => "watermark",
        }
    }
}

/// What a layer puts on the page.
#[derive(Debug, Clone, PartialEq)]
pub enum StampContent {
    Text(String),
    /// Image file, relative to the job directory.
    Image(String),
}

/// One stamp application to a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct StampLayer {
    pub kind: StampKind,
    pub content: StampContent,
    pub descriptor: StampDescriptor,
}

impl StampLayer {
    pub fn text(text: impl Into<String>, descriptor: StampDescriptor) -> Self {
        Self {
            kind: StampKind::Stamp,
            content: StampContent::Text(text.into()),
            descriptor,
        }
    }

    pub fn image(path: impl Into<String>, descriptor: StampDescriptor) -> Self {
        Self {
            kind: StampKind::Stamp,
            content: StampContent::Image(path.into()),
            descriptor,
        }
    }

    pub fn watermark(mut self) -> Self {
        self.kind = StampKind::Watermark;
        self
    }

    /// `pdfcpu` argv for stamping `input` into `output`.
    ///
    /// The `--` keeps user text starting with `-` from being read as a flag.
    pub fn to_args(&self, input: &str, output: &str) -> Vec<String> {
        let (mode, payload) = match &self.content {
            StampContent::Text(t) => ("text", t.as_str()),
            StampContent::Image(p) => ("image", p.as_str()),
        };
        vec![
            self.kind.command().to_string(),
            "add".into(),
            "-mode".into(),
            mode.into(),
            "--".into(),
            payload.into(),
            self.descriptor.to_string(),
            input.into(),
            output.into(),
        ]
    }
}

/// Apply `layers` in order to `input`, writing the last result to `output`.
///
/// Intermediate results go to the task's scratch directory. All paths are
/// relative to the job directory.
pub async fn apply_layers(
    env: &TaskEnv<'_>,
    layers: &[StampLayer],
    input: &str,
    output: &str,
    step: &str,
) -> Result<(), PdfJobError> {
    let mut current = input.to_string();
    for (k, layer) in layers.iter().enumerate() {
        let target = if k + 1 == layers.len() {
            output.to_string()
        } else {
            env.scratch_file(&format!("layer-{k}.pdf"))
        };
        env.invoker
            .run(env.job_dir, &env.programs.pdfcpu, layer.to_args(&current, &target))
            .await
            .map_err(|e| PdfJobError::tool(step, e))?;
        current = target;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_descriptor_matches_pdfcpu_grammar() {
        let d = StampDescriptor {
            anchor: Anchor::BottomCenter,
            offset: Some((0, 20)),
            points: Some(10),
            opacity: Some(0.95),
            fill: Some(Rgb::gray(0.15)),
            ..StampDescriptor::default()
        };
        assert_eq!(
            d.to_string(),
            "pos:bc, off:0 20, points:10, scale:1 abs, rot:0, op:0.95, fillc:0.15 0.15 0.15"
        );
    }

    #[test]
    fn overlay_descriptor() {
        assert_eq!(
            StampDescriptor::full_page_overlay().to_string(),
            "pos:tl, off:0 0, scale:1 abs, rot:0"
        );
    }

    #[test]
    fn hex_colours() {
        let red = Rgb::from_hex("#ff0000").unwrap();
        assert_eq!((red.r, red.g, red.b), (1.0, 0.0, 0.0));
        assert!(Rgb::from_hex("fff").is_none());
        assert!(Rgb::from_hex("#zzzzzz").is_none());
    }

    #[test]
    fn anchors_round_trip_codes() {
        for code in ["tl", "tc", "tr", "l", "c", "r", "bl", "bc", "br"] {
            assert_eq!(Anchor::from_code(code).unwrap().code(), code);
        }
        assert!(Anchor::from_code("middle").is_none());
        assert!(Anchor::TopRight.is_top());
        assert!(!Anchor::BottomLeft.is_top());
    }

    #[test]
    fn layer_args_keep_text_as_one_element() {
        let layer = StampLayer::text("-3; rm -rf /", StampDescriptor::default()).watermark();
        let args = layer.to_args("pages/page_1.pdf", "stamped/stamped-0001.pdf");
        assert_eq!(args[0], "watermark");
        assert_eq!(args[4], "--");
        assert_eq!(args[5], "-3; rm -rf /");
        assert_eq!(args.len(), 9);
    }
}
