//! Per-request job directories and their retention sweep.
//!
//! Every request that produces files gets a fresh directory under the
//! storage root, named by a [`JobId`]. Nothing closes a job explicitly; the
//! sweeper deletes directories whose modification time is older than the
//! retention window.
//!
//! The sweep takes no lock against request handlers. A handler still
//! writing into a job older than the retention window may see its files
//! disappear; the retention window is expected to be far longer than any
//! request.

use crate::error::PdfJobError;
use crate::naming::{PAGES_DIR, PREVIEWS_DIR, STAMPED_DIR};
use crate::state::StateTracker;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// File name of the uploaded document inside a job.
pub const INPUT_FILE: &str = "input.pdf";

// ── Job identifiers ──────────────────────────────────────────────────────

/// Opaque job token. Generated as a ULID; parsed leniently but never
/// allowed to contain path syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(Ulid::new().to_string())
    }

    /// Accept a client-supplied id if it is a bare token.
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        ok.then(|| JobId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────

/// A job directory owned by one request.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    dir: PathBuf,
}

impl Job {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `name` directly inside the job directory.
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    pub fn input_path(&self) -> PathBuf {
        self.path(INPUT_FILE)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.path(PAGES_DIR)
    }

    pub fn stamped_dir(&self) -> PathBuf {
        self.path(STAMPED_DIR)
    }

    pub fn previews_dir(&self) -> PathBuf {
        self.path(PREVIEWS_DIR)
    }

    /// Create `name` under the job directory (idempotent) and return it.
    pub async fn ensure_subdir(&self, name: &str) -> Result<PathBuf, PdfJobError> {
        let dir = self.path(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PdfJobError::io(&dir, e))?;
        Ok(dir)
    }

    /// Store the uploaded document as `input.pdf`.
    ///
    /// The bytes go to a temporary file in the job directory first and are
    /// persisted under the final name in one rename.
    pub async fn save_input(&self, bytes: Vec<u8>) -> Result<PathBuf, PdfJobError> {
        self.write_atomic(INPUT_FILE, bytes).await
    }

    /// Write `bytes` to `name` inside the job directory via temp file + rename.
    pub async fn write_atomic(&self, name: &str, bytes: Vec<u8>) -> Result<PathBuf, PdfJobError> {
        let dir = self.dir.clone();
        let target = self.path(name);
        let dest = target.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PdfJobError> {
            let mut tmp =
                tempfile::NamedTempFile::new_in(&dir).map_err(|e| PdfJobError::io(&dir, e))?;
            if let Err(e) = tmp.write_all(&bytes).and_then(|()| tmp.flush()) {
                return Err(PdfJobError::io(tmp.path(), e));
            }
            tmp.persist(&dest)
                .map_err(|e| PdfJobError::io(&dest, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| PdfJobError::Internal(format!("write task failed: {e}")))??;
        Ok(target)
    }

    /// Client-facing URL of a file directly inside this job.
    pub fn download_url(&self, file_name: &str) -> String {
        format!("/downloads/{}/{}", self.id, file_name)
    }

    /// `<base>_<operation>.pdf`, where `base` is the sanitised stem of the
    /// uploaded file name. Generic stems (`input`, `file`, empty) become
    /// `output`.
    pub fn output_name(original: &str, operation: &str) -> String {
        let name = sanitize_filename(original);
        let base = match name.rfind('.') {
            Some(i) if i > 0 => &name[..i],
            _ => name.as_str(),
        };
        let base = match base.trim() {
            "" | "input" | "file" => "output",
            b => b,
        };
        format!("{base}_{operation}.pdf")
    }
}

/// Reduce a client-supplied file name to a single path component.
///
/// Directory parts are dropped and any remaining separator becomes `_`.
/// An empty result is returned as `file`.
pub fn sanitize_filename(name: &str) -> String {
    let trimmed = name.trim();
    let last = trimmed
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let cleaned = last.replace(['/', '\\'], "_");
    match cleaned.trim() {
        "" | "." | ".." => "file".to_string(),
        s => s.to_string(),
    }
}

// ── Workspaces ───────────────────────────────────────────────────────────

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Job directories examined.
    pub scanned: usize,
    /// Names of the directories deleted.
    pub removed: Vec<String>,
    /// Directories younger than the cutoff.
    pub kept: usize,
    /// Entries that could not be inspected or deleted.
    pub failed: usize,
}

/// The storage root and the jobs under it.
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
}

impl Workspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<(), PdfJobError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PdfJobError::io(&self.root, e))
    }

    /// Create a fresh, empty job directory.
    pub async fn create_job(&self) -> Result<Job, PdfJobError> {
        let id = JobId::generate();
        let dir = self.root.join(id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PdfJobError::io(&dir, e))?;
        debug!("Created job {}", id);
        Ok(Job { id, dir })
    }

    /// Open an existing job by client-supplied id.
    pub async fn open_job(&self, raw_id: &str) -> Result<Job, PdfJobError> {
        let not_found = || PdfJobError::JobNotFound {
            job_id: raw_id.to_string(),
        };
        let id = JobId::parse(raw_id).ok_or_else(not_found)?;
        let dir = self.root.join(id.as_str());
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Job { id, dir }),
            _ => Err(not_found()),
        }
    }

    /// Delete every job directory last modified before `now - max_age`.
    ///
    /// Plain files at the root are ignored. A failure on one entry is
    /// counted and logged; the sweep carries on.
    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport, PdfJobError> {
        let mut report = SweepReport::default();
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return Ok(report);
        };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(PdfJobError::io(&self.root, e)),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Sweep stopped reading {}: {}", self.root.display(), e);
                    report.failed += 1;
                    break;
                }
            };
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Sweep could not stat {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if !meta.is_dir() {
                continue;
            }
            report.scanned += 1;

            let modified = match meta.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Sweep could not read mtime of {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            if modified >= cutoff {
                report.kept += 1;
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!("Swept {}", path.display());
                    report
                        .removed
                        .push(entry.file_name().to_string_lossy().into_owned());
                }
                Err(e) => {
                    warn!("Sweep could not remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Run [`Workspaces::sweep`] every `interval` until `shutdown` turns true.
///
/// The first sweep happens one interval after start. State-tracker entries
/// of removed jobs are dropped.
pub fn spawn_sweeper(
    workspaces: Workspaces,
    interval: Duration,
    max_age: Duration,
    tracker: StateTracker,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Sweeper started: every {}s, retention {}s",
            interval.as_secs(),
            max_age.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match workspaces.sweep(max_age).await {
                        Ok(report) => {
                            for name in &report.removed {
                                tracker.forget_job(name);
                            }
                            info!(
                                "Sweep: scanned={} removed={} kept={} failed={}",
                                report.scanned,
                                report.removed.len(),
                                report.kept,
                                report.failed
                            );
                        }
                        Err(e) => warn!("Sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn age_dir(path: &Path, age: Duration) {
        let f = std::fs::File::open(path).unwrap();
        f.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn job_id_parse_rejects_path_syntax() {
        assert!(JobId::parse("01HZX3Q8V9").is_some());
        assert!(JobId::parse("").is_none());
        assert!(JobId::parse("..").is_none());
        assert!(JobId::parse("a/b").is_none());
        assert!(JobId::parse("a\\b").is_none());
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(JobId::parse(a.as_str()).is_some());
    }

    #[test]
    fn output_name_rules() {
        assert_eq!(Job::output_name("report.pdf", "numbered"), "report_numbered.pdf");
        assert_eq!(Job::output_name("input.pdf", "watermarked"), "output_watermarked.pdf");
        assert_eq!(Job::output_name("", "signed"), "output_signed.pdf");
        assert_eq!(Job::output_name("../../etc/passwd", "x"), "passwd_x.pdf");
        assert_eq!(Job::output_name("C:\\docs\\plan.v2.pdf", "x"), "plan.v2_x.pdf");
    }

    #[test]
    fn sanitize_filename_strips_directories() {
        assert_eq!(sanitize_filename("  a/b/c.pdf "), "c.pdf");
        assert_eq!(sanitize_filename("dir\\name.pdf"), "name.pdf");
        assert_eq!(sanitize_filename("/"), "file");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[tokio::test]
    async fn create_and_open_job() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspaces::new(tmp.path());
        let a = ws.create_job().await.unwrap();
        let b = ws.create_job().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.dir().is_dir());

        let opened = ws.open_job(a.id().as_str()).await.unwrap();
        assert_eq!(opened.dir(), a.dir());
        assert!(matches!(
            ws.open_job("../etc").await,
            Err(PdfJobError::JobNotFound { .. })
        ));
        assert!(matches!(
            ws.open_job("NOSUCHJOB").await,
            Err(PdfJobError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn save_input_persists_bytes() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspaces::new(tmp.path());
        let job = ws.create_job().await.unwrap();
        let path = job.save_input(b"%PDF-1.7".to_vec()).await.unwrap();
        assert_eq!(path, job.input_path());
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
        let leftovers = std::fs::read_dir(job.dir()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_directories() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspaces::new(tmp.path());
        let old = ws.create_job().await.unwrap();
        std::fs::write(old.path("input.pdf"), b"x").unwrap();
        age_dir(old.dir(), Duration::from_secs(3 * 3600));
        let fresh = ws.create_job().await.unwrap();

        let stray = tmp.path().join("README");
        std::fs::write(&stray, b"not a job").unwrap();
        age_dir(&stray, Duration::from_secs(3 * 3600));

        let report = ws.sweep(Duration::from_secs(2 * 3600)).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, vec![old.id().to_string()]);
        assert_eq!(report.kept, 1);
        assert_eq!(report.failed, 0);
        assert!(!old.dir().exists());
        assert!(fresh.dir().exists());
        assert!(stray.exists());
    }

    #[tokio::test]
    async fn sweep_on_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspaces::new(tmp.path().join("absent"));
        let report = ws.sweep(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(
            Workspaces::new(tmp.path()),
            Duration::from_secs(3600),
            Duration::from_secs(7200),
            StateTracker::new(),
            rx,
        );
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
