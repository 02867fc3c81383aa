//! Job commands — what a job runs and how it is rendered into the wrapper script.
//!
//! A command is either a shell line (handed to the shell verbatim via `-c`) or
//! an argument vector. Both are lowered to an argv, quoted, and run inside a
//! subshell of the generated wrapper script, so shell builtins such as `exit`
//! work in either form.

use crate::error::{JobError, Result};
use crate::store::files;

/// A command to run as a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    /// A shell command line, run as `<shell> -c <line>`.
    Shell(String),
    /// An argument vector; the first element is the program.
    Args(Vec<String>),
}

impl JobCommand {
    /// Create a shell command line.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    /// Create an argument-vector command.
    pub fn args<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Args(argv.into_iter().map(Into::into).collect())
    }

    /// Lower to an explicit argv. A shell line becomes `[shell, "-c", line]`.
    pub fn to_argv(&self, shell: &str) -> Vec<String> {
        match self {
            Self::Shell(line) => vec![shell.to_string(), "-c".to_string(), line.clone()],
            Self::Args(argv) => argv.clone(),
        }
    }

    /// Check that the command can be rendered into a wrapper script.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Args(argv) if argv.is_empty() => Err(JobError::InvalidCommand {
                reason: "argument vector is empty".to_string(),
            }
            .into()),
            Self::Args(argv) => quote_argv(argv).map(|_| ()),
            Self::Shell(line) => quote_argv(std::slice::from_ref(line)).map(|_| ()),
        }
    }

    /// Display label used when the caller does not supply one: the shell line
    /// verbatim, or the shell-quoted argument vector.
    pub fn default_label(&self) -> Result<String> {
        match self {
            Self::Shell(line) => Ok(line.clone()),
            Self::Args(argv) => quote_argv(argv),
        }
    }

    /// Render the wrapper script run by the detached worker.
    ///
    /// The script records its own pid, runs the command in a subshell and
    /// records the exit status. Both records are a single builtin `echo`, so
    /// they do not depend on the job's `PATH`. If the pid cannot be recorded
    /// the command is never run.
    pub fn wrapper_script(&self, shell: &str) -> Result<String> {
        self.validate()?;
        let line = quote_argv(&self.to_argv(shell))?;
        Ok(format!(
            "echo $$ > {pid} || exit 127\n\
             ({line})\n\
             echo $? > {rc}\n",
            pid = files::PID,
            rc = files::RETCODE,
        ))
    }
}

impl From<&str> for JobCommand {
    fn from(line: &str) -> Self {
        Self::Shell(line.to_string())
    }
}

impl From<String> for JobCommand {
    fn from(line: String) -> Self {
        Self::Shell(line)
    }
}

impl From<Vec<String>> for JobCommand {
    fn from(argv: Vec<String>) -> Self {
        Self::Args(argv)
    }
}

impl From<Vec<&str>> for JobCommand {
    fn from(argv: Vec<&str>) -> Self {
        Self::args(argv)
    }
}

impl From<&[&str]> for JobCommand {
    fn from(argv: &[&str]) -> Self {
        Self::args(argv.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for JobCommand {
    fn from(argv: [&str; N]) -> Self {
        Self::args(argv)
    }
}

fn quote_argv(argv: &[String]) -> Result<String> {
    shlex::try_join(argv.iter().map(String::as_str)).map_err(|e| {
        JobError::InvalidCommand {
            reason: e.to_string(),
        }
        .into()
    })
}
