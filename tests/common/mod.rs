//! Scripted stand-ins for the external PDF tools.
//!
//! A fake PDF is a text file: a `%PDF-fake` header followed by one line per
//! page. Each tool is emulated closely enough to exercise naming quirks:
//! `pdfcpu extract` writes `input_page_<n>.pdf`, `pdftoppm` zero-pads page
//! numbers to the width of the document's page count, and stamps append a
//! marker to every page line they touch.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdfjobs::{CommandSpec, ServiceConfig, ToolError, ToolOutput, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const HEADER: &str = "%PDF-fake";

/// Body of a fake PDF with `n` pages labelled `p1..pn`.
pub fn fake_pdf(n: usize) -> Vec<u8> {
    let mut s = String::from(HEADER);
    for i in 1..=n {
        s.push_str(&format!("\np{i}"));
    }
    s.push('\n');
    s.into_bytes()
}

pub fn read_pages(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    text.lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_pages(path: &Path, pages: &[String]) -> std::io::Result<()> {
    let mut s = String::from(HEADER);
    for p in pages {
        s.push('\n');
        s.push_str(p);
    }
    s.push('\n');
    std::fs::write(path, s)
}

fn write_png(path: &Path, w: u32, h: u32) -> std::io::Result<()> {
    image::RgbImage::new(w, h)
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(std::io::Error::other)
}

/// Parse a pdfcpu page list such as `3,1-2`.
fn page_list(spec: &str, total: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => {
                let a: usize = a.parse().unwrap_or(1);
                let b: usize = if b.is_empty() { total } else { b.parse().unwrap_or(total) };
                out.extend(a..=b);
            }
            None => out.extend(part.parse::<usize>().ok()),
        }
    }
    out
}

/// Fake tool runner. Records every argv and can be told to fail.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    /// `(program, first arg)` pairs that exit with status 1.
    fail: Mutex<Vec<(String, String)>>,
    /// Programs reported as not installed.
    missing: Mutex<Vec<String>>,
    /// Sleep before each `pdftoppm` run.
    pub render_delay: Mutex<Option<Duration>>,
    pub renders: AtomicUsize,
    /// Non-padded `pdftoppm` names, as newer poppler versions write.
    pub unpadded_previews: Mutex<bool>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, program: &str, first_arg: &str) {
        self.fail
            .lock()
            .unwrap()
            .push((program.to_string(), first_arg.to_string()));
    }

    pub fn clear_failures(&self) {
        self.fail.lock().unwrap().clear();
    }

    pub fn uninstall(&self, program: &str) {
        self.missing.lock().unwrap().push(program.to_string());
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// `pdfcpu` calls whose first argument is `sub`.
    pub fn pdfcpu(&self, sub: &str) -> Vec<Vec<String>> {
        self.calls_to("pdfcpu")
            .into_iter()
            .filter(|a| a.first().map(String::as_str) == Some(sub))
            .collect()
    }

    fn emulate(&self, program: &str, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput> {
        let at = |rel: &str| -> PathBuf { cwd.join(rel) };
        match (program, args.first().map(String::as_str)) {
            ("pdfcpu", Some("info")) => {
                let n = read_pages(&at(&args[1])).len();
                Ok(ToolOutput::with_stdout(format!("PDF version: 1.7\n     Pages: {n}\n")))
            }
            ("pdfinfo", _) => {
                let n = read_pages(&at(&args[0])).len();
                if n == 0 {
                    return Ok(ToolOutput::failed(1, "Syntax Error: not a PDF"));
                }
                Ok(ToolOutput::with_stdout(format!(
                    "Producer:       fake\nPages:          {n}\nPage size:      612 x 792 pts (letter)\n"
                )))
            }
            ("pdfcpu", Some("extract")) => {
                // extract -mode page <in> <outdir>
                let input = at(&args[3]);
                let stem = Path::new(&args[3])
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for (i, page) in read_pages(&input).iter().enumerate() {
                    let name = format!("{stem}_page_{}.pdf", i + 1);
                    write_pages(&at(&args[4]).join(name), std::slice::from_ref(page))?;
                }
                Ok(ToolOutput::ok())
            }
            ("pdfcpu", Some(cmd @ ("stamp" | "watermark"))) => {
                // <cmd> add -mode <mode> -- <payload> <desc> <in> <out>
                let (mode, payload, input, output) = (&args[3], &args[5], &args[7], &args[8]);
                let mark = match (cmd, mode.as_str()) {
                    (_, "image") => "+img".to_string(),
                    ("watermark", _) => format!("+wm({payload})"),
                    _ => format!("+stamp({payload})"),
                };
                let pages: Vec<String> = read_pages(&at(input))
                    .into_iter()
                    .map(|p| format!("{p} {mark}"))
                    .collect();
                write_pages(&at(output), &pages)?;
                Ok(ToolOutput::ok())
            }
            ("pdfcpu", Some("merge")) => {
                let mut pages = Vec::new();
                for f in &args[2..] {
                    let p = at(f);
                    if !p.is_file() {
                        return Ok(ToolOutput::failed(1, format!("missing {f}")));
                    }
                    pages.extend(read_pages(&p));
                }
                write_pages(&at(&args[1]), &pages)?;
                Ok(ToolOutput::ok())
            }
            ("pdfcpu", Some("rotate")) => {
                // rotate -pages <list> <file> -<deg>
                let file = at(&args[3]);
                let mut pages = read_pages(&file);
                let selected = page_list(&args[2], pages.len());
                for (i, p) in pages.iter_mut().enumerate() {
                    if selected.contains(&(i + 1)) {
                        p.push_str(&format!(" rot{}", args[4]));
                    }
                }
                write_pages(&file, &pages)?;
                Ok(ToolOutput::ok())
            }
            ("pdfcpu", Some("collect")) => {
                // collect -pages <order> <in> <out>
                let pages = read_pages(&at(&args[3]));
                let picked: Vec<String> = page_list(&args[2], pages.len())
                    .into_iter()
                    .filter_map(|n| n.checked_sub(1).and_then(|i| pages.get(i)).cloned())
                    .collect();
                write_pages(&at(&args[4]), &picked)?;
                Ok(ToolOutput::ok())
            }
            ("pdftoppm", _) => {
                self.renders.fetch_add(1, Ordering::SeqCst);
                self.render(args, cwd)
            }
            ("convert", _) => {
                let Some(last) = args.last() else {
                    return Ok(ToolOutput::failed(1, "no output"));
                };
                let out = last.strip_prefix("PNG32:").unwrap_or(last);
                if out.ends_with(".pdf") {
                    write_pages(&at(out), &["redacted".to_string()])?;
                } else {
                    write_png(&at(out), 8, 8)?;
                }
                Ok(ToolOutput::ok())
            }
            ("qpdf", _) => {
                let n = args.len();
                std::fs::copy(at(&args[n - 2]), at(&args[n - 1]))?;
                Ok(ToolOutput::ok())
            }
            _ => Ok(ToolOutput::failed(2, format!("unknown command {program} {args:?}"))),
        }
    }

    /// `pdftoppm -png -r <dpi> [-f n -l n] <in> <prefix>`
    fn render(&self, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput> {
        let mut first = None;
        let mut last = None;
        let mut i = 3;
        while i + 1 < args.len() && args[i].starts_with('-') {
            match args[i].as_str() {
                "-f" => first = args[i + 1].parse::<usize>().ok(),
                "-l" => last = args[i + 1].parse::<usize>().ok(),
                _ => {}
            }
            i += 2;
        }
        let (input, prefix) = (&args[args.len() - 2], &args[args.len() - 1]);
        let total = read_pages(&cwd.join(input)).len();
        if total == 0 {
            return Ok(ToolOutput::failed(1, "Syntax Error: not a PDF"));
        }
        let first = first.unwrap_or(1);
        let last = last.unwrap_or(total).min(total);
        if first > last {
            return Ok(ToolOutput::failed(99, "Wrong page range given"));
        }
        let width = total.to_string().len();
        let unpadded = *self.unpadded_previews.lock().unwrap();
        for n in first..=last {
            let name = if unpadded {
                format!("{prefix}-{n}.png")
            } else {
                format!("{prefix}-{n:0width$}.png")
            };
            write_png(&cwd.join(name), 85, 110)?;
        }
        Ok(ToolOutput::ok())
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, spec: &CommandSpec, _timeout: Duration) -> Result<ToolOutput, ToolError> {
        let program = spec.program_name();
        let args = spec.arg_strings();
        self.calls
            .lock()
            .unwrap()
            .push((program.clone(), args.clone()));

        if self.missing.lock().unwrap().contains(&program) {
            return Err(ToolError::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        let first = args.first().cloned().unwrap_or_default();
        let fail = self
            .fail
            .lock()
            .unwrap()
            .iter()
            .any(|(p, a)| *p == program && (a.is_empty() || *a == first));
        if fail {
            return Ok(ToolOutput::failed(1, format!("{program}: scripted failure")));
        }

        if program == "pdftoppm" {
            let delay = *self.render_delay.lock().unwrap();
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
        }

        let cwd = spec.work_dir().map(Path::to_path_buf).unwrap_or_default();
        self.emulate(&program, &args, &cwd)
            .map_err(|e| ToolError::Interrupted {
                program,
                detail: e.to_string(),
            })
    }
}

/// Config rooted at `root` with default program names.
pub fn config(root: &Path) -> ServiceConfig {
    ServiceConfig::builder()
        .storage_root(root)
        .build()
        .expect("valid config")
}

/// Every file under `dir`, relative, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else { continue };
        for e in entries.flatten() {
            let p = e.path();
            if p.is_dir() {
                stack.push(p);
            } else if let Ok(rel) = p.strip_prefix(dir) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    out.sort();
    out
}
