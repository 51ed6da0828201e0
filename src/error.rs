//! Error types for the edgequake-pdfjobs library.
//!
//! Three error types reflect three layers of failure:
//!
//! * [`PdfJobError`] — **Fatal for the request**: the job cannot produce its
//!   artifact (bad upload, tool failure, missing page artifact, filesystem
//!   error). There is no partial output and no retry; the caller resubmits.
//!
//! * [`ToolError`] — a single external-program invocation failed. It carries
//!   the captured output for operator logs and is folded into
//!   [`PdfJobError::ToolFailed`] by the orchestrator.
//!
//! * [`GatewayError`] — the download/preview gateway refused or could not
//!   find a client-supplied path.
//!
//! Every fatal error maps to an [`ErrorCategory`] and a short
//! [`PdfJobError::public_message`] that never leaks tool internals.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure classes exposed to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing/invalid upload or malformed structured parameters.
    Input,
    /// Non-zero exit or timeout of an external tool.
    Tool,
    /// An expected artifact could not be located after a tool run.
    Naming,
    /// Job creation, rename, write, or delete failed.
    Filesystem,
    /// Unknown job or artifact.
    NotFound,
    /// Path escaped the storage root.
    Forbidden,
    /// Unexpected internal error.
    Internal,
}

/// All fatal errors returned by the orchestration core.
#[derive(Debug, Error)]
pub enum PdfJobError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request is missing a field or carries an invalid value.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A structured JSON parameter (redactions, signatures, annotations,
    /// rotations) could not be parsed.
    #[error("Malformed '{field}' parameter: {detail}")]
    MalformedParameter { field: String, detail: String },

    // ── Tool errors ───────────────────────────────────────────────────────
    /// An external tool failed; the captured output lives in `source`.
    #[error("Tool step '{step}' failed: {source}")]
    ToolFailed {
        step: String,
        #[source]
        source: ToolError,
    },

    /// Neither the primary nor the fallback page counter produced a count.
    #[error("Could not determine page count of '{path}'")]
    PageCountUnavailable { path: PathBuf },

    // ── Naming errors ─────────────────────────────────────────────────────
    /// A tool reported success but its output for this role is missing.
    #[error("No artifact found for {role} in '{dir}'")]
    ArtifactNotFound { role: String, dir: PathBuf },

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// Any filesystem operation inside the workspace failed.
    #[error("Workspace I/O error at '{path}': {source}")]
    WorkspaceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Job id is not a known workspace.
    #[error("Job '{job_id}' not found")]
    JobNotFound { job_id: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdfJobError {
    /// Convenience constructor for [`PdfJobError::WorkspaceIo`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PdfJobError::WorkspaceIo {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for [`PdfJobError::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        PdfJobError::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap a [`ToolError`] with the pipeline step that triggered it.
    pub fn tool(step: impl Into<String>, source: ToolError) -> Self {
        PdfJobError::ToolFailed {
            step: step.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PdfJobError::InvalidInput { .. } | PdfJobError::MalformedParameter { .. } => {
                ErrorCategory::Input
            }
            PdfJobError::ToolFailed { .. } | PdfJobError::PageCountUnavailable { .. } => {
                ErrorCategory::Tool
            }
            PdfJobError::ArtifactNotFound { .. } => ErrorCategory::Naming,
            PdfJobError::WorkspaceIo { .. } => ErrorCategory::Filesystem,
            PdfJobError::JobNotFound { .. } => ErrorCategory::NotFound,
            PdfJobError::InvalidConfig(_) | PdfJobError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Short message safe to return to a client.
    ///
    /// Input errors keep their own message (but never a raw parse error);
    /// everything else collapses to a generic string so tool output, paths,
    /// and OS error text stay in the server log.
    pub fn public_message(&self) -> String {
        match self {
            PdfJobError::InvalidInput { message } => message.clone(),
            PdfJobError::MalformedParameter { field, .. } => format!("invalid {field}"),
            PdfJobError::JobNotFound { .. } => "job not found".to_string(),
            PdfJobError::PageCountUnavailable { .. } => "failed to read page count".to_string(),
            PdfJobError::ToolFailed { step, .. } => format!("failed to {step}"),
            PdfJobError::ArtifactNotFound { .. } => "failed to process page".to_string(),
            PdfJobError::WorkspaceIo { .. } => "failed to prepare job files".to_string(),
            PdfJobError::InvalidConfig(_) | PdfJobError::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }
}

/// A single external-tool invocation failed.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started (missing binary, bad cwd).
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exceeded its wall-clock budget and was killed.
    #[error("'{program}' timed out after {}s", .timeout.as_secs())]
    TimedOut {
        program: String,
        timeout: Duration,
        output: String,
    },

    /// The program exited unsuccessfully.
    #[error("'{program}' exited with {status}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    /// The detached invocation task panicked or was aborted.
    #[error("invocation of '{program}' was interrupted: {detail}")]
    Interrupted { program: String, detail: String },
}

impl ToolError {
    /// Combined stdout/stderr captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            ToolError::TimedOut { output, .. } | ToolError::Failed { output, .. } => output,
            ToolError::Spawn { .. } | ToolError::Interrupted { .. } => "",
        }
    }
}

/// Gateway refusals.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request path tried to leave the storage root.
    #[error("forbidden path '{path}'")]
    Forbidden { path: String },

    /// No regular file exists at the resolved location.
    #[error("file not found: '{path}'")]
    NotFound { path: String },

    /// A lazy preview render was attempted and failed.
    #[error("preview materialisation failed: {0}")]
    Materialize(#[from] PdfJobError),
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Forbidden { .. } => ErrorCategory::Forbidden,
            GatewayError::NotFound { .. } => ErrorCategory::NotFound,
            GatewayError::Materialize(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_public_message_hides_output() {
        let e = PdfJobError::tool(
            "add page numbers",
            ToolError::Failed {
                program: "pdfcpu".into(),
                status: "exit status: 1".into(),
                output: "pdfcpu: secret internal trace".into(),
            },
        );
        assert_eq!(e.category(), ErrorCategory::Tool);
        let msg = e.public_message();
        assert_eq!(msg, "failed to add page numbers");
        assert!(!msg.contains("secret"));
    }

    #[test]
    fn malformed_parameter_never_echoes_parse_error() {
        let e = PdfJobError::MalformedParameter {
            field: "redactions".into(),
            detail: "expected value at line 1 column 2".into(),
        };
        assert_eq!(e.category(), ErrorCategory::Input);
        assert_eq!(e.public_message(), "invalid redactions");
    }

    #[test]
    fn timeout_display_mentions_seconds() {
        let e = ToolError::TimedOut {
            program: "pdftoppm".into(),
            timeout: Duration::from_secs(120),
            output: String::new(),
        };
        assert!(e.to_string().contains("120s"), "got: {e}");
    }

    #[test]
    fn naming_and_fs_categories() {
        let naming = PdfJobError::ArtifactNotFound {
            role: "page 3 source".into(),
            dir: PathBuf::from("/tmp/x"),
        };
        assert_eq!(naming.category(), ErrorCategory::Naming);

        let fs = PdfJobError::io("/tmp/x", std::io::Error::other("disk full"));
        assert_eq!(fs.category(), ErrorCategory::Filesystem);
        assert!(!fs.public_message().contains("disk full"));
    }

    #[test]
    fn gateway_categories() {
        let f = GatewayError::Forbidden { path: "../x".into() };
        assert_eq!(f.category(), ErrorCategory::Forbidden);
        let n = GatewayError::NotFound { path: "a/b".into() };
        assert_eq!(n.category(), ErrorCategory::NotFound);
    }
}
