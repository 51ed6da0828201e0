//! Tool Invoker: run external programs with a bounded wall-clock budget.
//!
//! ```text
//! CommandSpec ──▶ Invoker ──▶ dyn ToolRunner ──▶ ToolOutput | ToolError
//!  (argv only)    (timeouts,   (SystemRunner in
//!                  logging)     production, fakes in tests)
//! ```
//!
//! 1. [`command`] — argv-style command description; no shell strings
//! 2. [`runner`]  — the [`ToolRunner`] seam and the tokio-process backed
//!    [`SystemRunner`]
//! 3. [`probe`]   — page-count and page-size probes built on the invoker
//!
//! Invocations are single-attempt. A failure is reported once with the
//! captured output in the log and is terminal for the calling operation.

pub mod command;
pub mod probe;
pub mod runner;

pub use command::CommandSpec;
pub use runner::{Invoker, SystemRunner, ToolOutput, ToolRunner};
