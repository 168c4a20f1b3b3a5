//! External tool invocation.
//!
//! Every tool disktree drives (`losetup`, `sfdisk`, `blkid`, the LVM suite,
//! `qemu-img`, `ostree`) is described by an [`Invocation`] and yields a
//! [`ToolOutput`]. Nothing here retries: a tool either succeeds or the caller
//! decides what its failure means.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::Command;

use crate::error::{DisktreeError, DisktreeResult};

/// A single external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
}

impl Invocation {
    /// Start describing a call to `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// The program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument list.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Run the command to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`DisktreeError::ToolSpawn`] if the program cannot be started.
    /// A non-zero exit is *not* an error here; see [`ToolOutput::check`].
    pub fn output(&self) -> DisktreeResult<ToolOutput> {
        tracing::debug!(command = %self, "Running external tool");

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| DisktreeError::ToolSpawn {
                program: self.program.clone(),
                source,
            })?;

        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            tracing::debug!(
                command = %self,
                code = ?result.code,
                stderr = %result.stderr.trim(),
                "External tool exited unsuccessfully"
            );
        }

        Ok(result)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of an [`Invocation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the tool exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status(&self) -> String {
        self.code.map_or_else(
            || "terminated by signal".to_string(),
            |code| format!("exit status {code}"),
        )
    }

    /// Turn a non-zero exit into [`DisktreeError::ToolFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tool did not exit successfully.
    pub fn check(self, invocation: &Invocation) -> DisktreeResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(DisktreeError::ToolFailed {
                command: invocation.to_string(),
                status: self.status(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}
