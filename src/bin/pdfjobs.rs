//! CLI binary for edgequake-pdfjobs.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service with
//! the retention sweeper, `sweep` runs one retention pass, and `number`
//! stamps page numbers on a local file with a terminal progress bar.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfjobs::pipeline::ops::{Margin, PageNumbers};
use edgequake_pdfjobs::pipeline::stamp::Anchor;
use edgequake_pdfjobs::server::{self, AppState};
use edgequake_pdfjobs::{
    Invoker, Job, PagePipeline, PipelineProgressCallback, ServiceConfig, SystemRunner, ToolPrograms,
    Workspaces,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages may finish out of
/// order when the page concurrency is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_pipeline_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Counting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Stamping");
        self.bar.reset_eta();
    }

    fn elapsed_ms(&self, page_num: usize) -> u128 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_pipeline_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Numbering {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, transformed: bool) {
        let elapsed_ms = self.elapsed_ms(page_num);
        let what = if transformed { "stamped" } else { "unchanged" };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(what),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed_ms = self.elapsed_ms(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_pipeline_complete(&self, total_pages: usize, transformed_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} of {} pages stamped",
            green("✔"),
            bold(&transformed_pages.to_string()),
            total_pages
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service on port 8080, files under ./work
  pdfjobs serve --listen 0.0.0.0:8080 --storage-root ./work

  # Delete jobs older than one hour, once
  pdfjobs sweep --retention 3600

  # Number the pages of a local file, starting at 5
  pdfjobs number report.pdf --start-at 5 -o report_numbered.pdf

REQUIRED PROGRAMS:
  pdfcpu     split, stamp, merge, rotate, collect
  pdfinfo    page count and size (poppler-utils)
  pdftoppm   previews and redaction rasters (poppler-utils)
  convert    overlays and redaction painting (ImageMagick)
  qpdf       linearising redacted output

ENVIRONMENT VARIABLES:
  PDFJOBS_STORAGE_ROOT    Job directory root
  PDFJOBS_RETENTION       Job retention in seconds
  PDFJOBS_TOOL_TIMEOUT    Per-invocation budget in seconds
  PDFJOBS_PDFCPU ...      Program overrides (see --help)
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pdfjobs",
    version,
    about = "Job workspaces and page pipelines around external PDF tools",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    service: ServiceArgs,

    #[arg(short, long, global = true, env = "PDFJOBS_VERBOSE")]
    verbose: bool,

    #[arg(short, long, global = true, env = "PDFJOBS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service and the retention sweeper.
    Serve {
        #[arg(long, env = "PDFJOBS_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
    /// Delete expired job directories once and exit.
    Sweep,
    /// Stamp page numbers on a local PDF.
    Number {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "bc")]
        position: String,

        #[arg(long, default_value_t = 10)]
        font_size: i64,

        #[arg(long, default_value_t = 0.95)]
        opacity: f64,

        #[arg(long, default_value_t = 1)]
        start_at: i64,

        #[arg(long, default_value = "medium")]
        margin: String,

        #[arg(long, env = "PDFJOBS_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    #[arg(long, global = true, env = "PDFJOBS_STORAGE_ROOT", default_value = "work")]
    storage_root: PathBuf,

    /// Seconds a job directory is kept after its last modification.
    #[arg(long, global = true, env = "PDFJOBS_RETENTION", default_value_t = 7200)]
    retention: u64,

    #[arg(long, global = true, env = "PDFJOBS_SWEEP_INTERVAL", default_value_t = 1800)]
    sweep_interval: u64,

    #[arg(long, global = true, env = "PDFJOBS_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    #[arg(long, global = true, env = "PDFJOBS_PREVIEW_DPI", default_value_t = 110,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    preview_dpi: u32,

    #[arg(long, global = true, env = "PDFJOBS_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    #[arg(long, global = true, env = "PDFJOBS_ALIAS_PREFIX", default_value = "/api/pdf")]
    alias_prefix: String,

    #[arg(long, global = true, env = "PDFJOBS_PDFCPU", default_value = "pdfcpu")]
    pdfcpu: String,

    #[arg(long, global = true, env = "PDFJOBS_PDFINFO", default_value = "pdfinfo")]
    pdfinfo: String,

    #[arg(long, global = true, env = "PDFJOBS_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: String,

    #[arg(long, global = true, env = "PDFJOBS_QPDF", default_value = "qpdf")]
    qpdf: String,

    #[arg(long, global = true, env = "PDFJOBS_CONVERT", default_value = "convert")]
    convert: String,
}

impl ServiceArgs {
    fn to_config(&self) -> Result<ServiceConfig> {
        ServiceConfig::builder()
            .storage_root(&self.storage_root)
            .retention(Duration::from_secs(self.retention))
            .sweep_interval(Duration::from_secs(self.sweep_interval))
            .tool_timeout(Duration::from_secs(self.tool_timeout))
            .preview_dpi(self.preview_dpi)
            .page_concurrency(self.page_concurrency)
            .alias_prefix(self.alias_prefix.clone())
            .programs(ToolPrograms {
                pdfcpu: self.pdfcpu.clone(),
                pdfinfo: self.pdfinfo.clone(),
                pdftoppm: self.pdftoppm.clone(),
                qpdf: self.qpdf.clone(),
                convert: self.convert.clone(),
            })
            .build()
            .context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while numbering.
    let show_progress = matches!(cli.command, Command::Number { no_progress: false, .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.service.to_config()?;

    match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Sweep => sweep(config).await,
        Command::Number {
            input,
            output,
            position,
            font_size,
            opacity,
            start_at,
            margin,
            no_progress,
        } => {
            let Some(anchor) = Anchor::from_code(&position) else {
                bail!("Unknown position '{position}' (expected tl, tc, tr, l, c, r, bl, bc, br)");
            };
            let op = PageNumbers::new()
                .anchor(anchor)
                .font_size(font_size)
                .opacity(opacity)
                .start_at(start_at)
                .margin(Margin::parse(&margin));
            number(config, input, output, op, !no_progress && !cli.quiet).await
        }
    }
}

async fn serve(config: ServiceConfig, listen: SocketAddr) -> Result<()> {
    let state = AppState::new(config, Arc::new(SystemRunner));
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    server::serve(state, listen, rx)
        .await
        .context("HTTP server failed")
}

async fn sweep(config: ServiceConfig) -> Result<()> {
    let report = Workspaces::new(&config.storage_root)
        .sweep(config.retention)
        .await
        .context("Sweep failed")?;
    eprintln!(
        "{} scanned {}, removed {}, kept {}, failed {}",
        green("✔"),
        report.scanned,
        bold(&report.removed.len().to_string()),
        report.kept,
        report.failed
    );
    Ok(())
}

async fn number(
    config: ServiceConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    op: PageNumbers,
    show_progress: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Cannot read {}", input.display()))?;
    let original = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let workspaces = Workspaces::new(&config.storage_root);
    workspaces.ensure_root().await?;
    let job = workspaces.create_job().await?;
    job.save_input(bytes).await?;

    let invoker = Invoker::new(Arc::new(SystemRunner), &config);
    let mut pipeline = PagePipeline::new(invoker, &config);
    let progress = show_progress.then(CliProgressCallback::new_dynamic);
    if let Some(ref cb) = progress {
        pipeline = pipeline.with_progress(cb.clone());
    }

    let name = Job::output_name(&original, "numbered");
    let outcome = pipeline.run(&job, &op, &name).await;
    if let (Err(_), Some(cb)) = (&outcome, &progress) {
        cb.bar.finish_and_clear();
        eprintln!(
            "{} failed after {} page error(s)",
            red("✘"),
            cb.errors.load(Ordering::SeqCst)
        );
    }
    let outcome = outcome.context("Numbering failed")?;

    let target = output.unwrap_or_else(|| {
        input
            .parent()
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name))
    });
    tokio::fs::copy(&outcome.output, &target)
        .await
        .with_context(|| format!("Cannot write {}", target.display()))?;
    eprintln!(
        "{} {} {}",
        green("✔"),
        bold(&target.display().to_string()),
        dim(&format!("({} ms, job {})", outcome.duration_ms, job.id()))
    );
    Ok(())
}
