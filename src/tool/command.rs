//! Argv-style command specification.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// A program, its discrete arguments, and the directory it runs in.
///
/// Arguments are never joined into a shell string; each element reaches the
/// child process verbatim, so user-supplied stamp text or file names cannot
/// inject shell syntax.
///
/// # Example
///
/// ```rust
/// use edgequake_pdfjobs::tool::CommandSpec;
///
/// let cmd = CommandSpec::new("pdfcpu")
///     .args(["merge", "out.pdf", "a.pdf", "b.pdf"])
///     .cwd("/tmp/job");
/// assert_eq!(cmd.args.len(), 4);
/// assert_eq!(cmd.to_string(), "pdfcpu merge out.pdf a.pdf b.pdf");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute.
    pub program: OsString,
    /// Arguments as discrete elements.
    pub args: Vec<OsString>,
    /// Working directory of the child process.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program name as a lossy UTF-8 string, for logs and errors.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments as lossy UTF-8 strings.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Working directory, if set.
    pub fn work_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Convert into a [`tokio::process::Command`] with the same argv and cwd.
    pub fn to_tokio_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_discrete_args() {
        let cmd = CommandSpec::new("pdfcpu")
            .arg("stamp")
            .args(["add", "-mode", "text", "--", "label; rm -rf /"])
            .cwd("/tmp/job");
        assert_eq!(cmd.program_name(), "pdfcpu");
        assert_eq!(cmd.args.len(), 6);
        assert_eq!(cmd.arg_strings()[5], "label; rm -rf /");
        assert_eq!(cmd.work_dir(), Some(Path::new("/tmp/job")));
    }

    #[test]
    fn display_joins_with_spaces() {
        let cmd = CommandSpec::new("pdfinfo").arg("input.pdf");
        assert_eq!(cmd.to_string(), "pdfinfo input.pdf");
    }
}
