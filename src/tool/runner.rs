//! Process execution behind the [`ToolRunner`] seam.
//!
//! [`SystemRunner`] spawns the child through `tokio::process` and waits for
//! it on a detached task. Dropping the caller's future (a client hanging up
//! mid-request) therefore does not kill the tool: it runs to completion or
//! to its own timeout, at which point it is killed. Output printed before
//! the kill is kept and travels in [`ToolError::TimedOut`].

use crate::config::ServiceConfig;
use crate::error::ToolError;
use crate::tool::CommandSpec;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// A successful, silent run. Handy for fakes.
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A successful run printing `stdout`.
    pub fn with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        let mut s = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        s
    }

    fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "termination by signal".to_string(),
        }
    }
}

/// Executes a [`CommandSpec`] within a timeout.
///
/// Implementations return `Ok` for any process that finished, whatever its
/// exit code; the [`Invoker`] decides what counts as failure. `Err` is
/// reserved for spawn failures, timeouts, and interrupted waits.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// Runs real programs via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<ToolOutput, ToolError> {
        let program = spec.program_name();
        let mut cmd = spec.to_tokio_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

        let waiter = tokio::spawn(async move {
            let (stdout, mut stdout_task) = drain(child.stdout.take());
            let (stderr, mut stderr_task) = drain(child.stderr.take());

            let waited = tokio::time::timeout(timeout, child.wait()).await;
            if waited.is_err() {
                if let Err(e) = child.start_kill() {
                    debug!("Could not kill timed-out child: {}", e);
                }
                let _ = child.wait().await;
            }

            // A surviving grandchild can hold the pipes open after the kill.
            let readers = async {
                let _ = (&mut stdout_task).await;
                let _ = (&mut stderr_task).await;
            };
            if tokio::time::timeout(PIPE_GRACE, readers).await.is_err() {
                stdout_task.abort();
                stderr_task.abort();
            }
            (waited, take_buffer(&stdout), take_buffer(&stderr))
        });

        match waiter.await {
            Ok((Ok(Ok(status)), stdout, stderr)) => Ok(ToolOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            }),
            Ok((Ok(Err(source)), _, _)) => Err(ToolError::Spawn { program, source }),
            Ok((Err(_elapsed), stdout, stderr)) => {
                let partial = ToolOutput {
                    stdout,
                    stderr,
                    exit_code: None,
                };
                Err(ToolError::TimedOut {
                    program,
                    timeout,
                    output: partial.combined(),
                })
            }
            Err(join) => Err(ToolError::Interrupted {
                program,
                detail: join.to_string(),
            }),
        }
    }
}

/// How long pipe readers may lag behind the exit of their process.
const PIPE_GRACE: Duration = Duration::from_secs(1);

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Copy a child pipe into a shared buffer as it arrives, so output written
/// before a kill is still there afterwards.
fn drain<R>(pipe: Option<R>) -> (SharedBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = SharedBuffer::default();
    let sink = buffer.clone();
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, task)
}

fn take_buffer(buffer: &SharedBuffer) -> Vec<u8> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|e| e.into_inner()))
}

/// Front door for every external invocation in the crate.
///
/// Applies the configured timeout class, sets the working directory, logs
/// the full command line and captured output on failure, and turns non-zero
/// exits into [`ToolError::Failed`]. There is no retry.
#[derive(Clone)]
pub struct Invoker {
    runner: Arc<dyn ToolRunner>,
    tool_timeout: Duration,
    browser_timeout: Duration,
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("runner", &"<dyn ToolRunner>")
            .field("tool_timeout", &self.tool_timeout)
            .field("browser_timeout", &self.browser_timeout)
            .finish()
    }
}

impl Invoker {
    pub fn new(runner: Arc<dyn ToolRunner>, config: &ServiceConfig) -> Self {
        Self {
            runner,
            tool_timeout: config.tool_timeout,
            browser_timeout: config.browser_timeout,
        }
    }

    /// Run a page/document transform in `work_dir`.
    pub async fn run<I, S>(
        &self,
        work_dir: &Path,
        program: &str,
        args: I,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let spec = CommandSpec::new(program).args(args).cwd(work_dir);
        self.execute(&spec, self.tool_timeout).await
    }

    /// Run a headless-browser render in `work_dir` (shorter budget).
    ///
    /// Reserved for HTML-to-PDF conversion; no current page operation
    /// uses this timeout class.
    pub async fn run_browser<I, S>(
        &self,
        work_dir: &Path,
        program: &str,
        args: I,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let spec = CommandSpec::new(program).args(args).cwd(work_dir);
        self.execute(&spec, self.browser_timeout).await
    }

    /// Run a probe and return its stdout as text.
    pub async fn output<I, S>(
        &self,
        work_dir: &Path,
        program: &str,
        args: I,
    ) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.run(work_dir, program, args)
            .await
            .map(|out| out.stdout_string())
    }

    /// Run a prepared spec with an explicit timeout.
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        debug!("Running: {}", spec);

        let result = self.runner.run(spec, timeout).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) if output.success() => {
                debug!("Finished in {}ms: {}", elapsed_ms, spec.program_name());
                Ok(output)
            }
            Ok(output) => {
                let combined = output.combined();
                warn!(
                    "Tool failed after {}ms: {} ({})\nOutput: {}",
                    elapsed_ms,
                    spec,
                    output.status_label(),
                    combined
                );
                Err(ToolError::Failed {
                    program: spec.program_name(),
                    status: output.status_label(),
                    output: combined,
                })
            }
            Err(e) => {
                warn!("Tool invocation error after {}ms: {}: {}", elapsed_ms, spec, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingRunner {
        reply: ToolOutput,
        seen: Mutex<Vec<(CommandSpec, Duration)>>,
    }

    #[async_trait]
    impl ToolRunner for RecordingRunner {
        async fn run(
            &self,
            spec: &CommandSpec,
            timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            self.seen.lock().unwrap().push((spec.clone(), timeout));
            Ok(self.reply.clone())
        }
    }

    fn invoker_with(reply: ToolOutput) -> (Invoker, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let invoker = Invoker::new(runner.clone(), &ServiceConfig::default());
        (invoker, runner)
    }

    #[test]
    fn combined_output_joins_streams() {
        let out = ToolOutput {
            stdout: b"line one".to_vec(),
            stderr: b"oops".to_vec(),
            exit_code: Some(1),
        };
        assert_eq!(out.combined(), "line one\noops");
        assert!(!out.success());
        assert!(ToolOutput::ok().success());
    }

    #[tokio::test]
    async fn run_uses_transform_timeout_and_cwd() {
        let (invoker, runner) = invoker_with(ToolOutput::ok());
        invoker
            .run(Path::new("/tmp/job"), "pdfcpu", ["info", "input.pdf"])
            .await
            .unwrap();
        invoker
            .run_browser(Path::new("/tmp/job"), "chromium", ["--headless"])
            .await
            .unwrap();

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].1, Duration::from_secs(120));
        assert_eq!(seen[0].0.work_dir(), Some(Path::new("/tmp/job")));
        assert_eq!(seen[1].1, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn non_zero_exit_becomes_failed_with_output() {
        let (invoker, _) = invoker_with(ToolOutput::failed(2, "bad xref"));
        let err = invoker
            .run(Path::new("/tmp"), "pdfcpu", ["merge"])
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { program, output, status } => {
                assert_eq!(program, "pdfcpu");
                assert_eq!(output, "bad xref");
                assert_eq!(status, "exit code 2");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_captures_output_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let out = SystemRunner
            .run(&spec, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout_string().trim(), "out");
        assert!(out.combined().contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_times_out() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = SystemRunner
            .run(&spec, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_run_keeps_output_printed_before_the_kill() {
        let spec = CommandSpec::new("sh").args(["-c", "echo partial-diagnostic; sleep 5"]);
        let started = Instant::now();
        let err = SystemRunner
            .run(&spec, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            ToolError::TimedOut { output, timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(500));
                assert!(output.contains("partial-diagnostic"), "{output:?}");
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_runner_reports_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-tool-xyz");
        let err = SystemRunner
            .run(&spec, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }), "got {err:?}");
    }
}
