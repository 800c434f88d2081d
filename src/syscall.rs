// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process execution.
//!
//! Everything x2deploy does to a target ends up as an external program call:
//! `sed` to rewrite configuration constants, `ssh` to reach remote hosts,
//! `rsync` to mirror file sets, `mysql` to refresh databases. This module
//! models those calls as plain argument lists, and routes them through an
//! [`Executor`] so callers never build shell strings by hand.
//!
//! # Remote Invocations
//!
//! OpenSSH joins every argument after the destination into one string, and
//! hands it to the remote user's shell. Thus, an [`Invocation`] forwarded over
//! SSH has each of its arguments single-quoted through [`shell_quote`] first,
//! so the remote shell sees exactly the argument list the local side built.

use crate::shell::shell_quote;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    process::{Command, Stdio},
};
use tracing::debug;

/// Program used as remote-execution transport.
pub const SSH: &str = "ssh";

/// An external program call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    secrets: Vec<usize>,
}

impl Invocation {
    /// Construct new invocation of target program with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that must never show up in logs, e.g., a password.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secrets.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Check if invocation carries secret arguments.
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// Name of program to call.
    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Arguments passed to program.
    pub fn arguments(&self) -> &[String] {
        self.args.as_slice()
    }

    /// Render invocation as one command line for a POSIX shell.
    ///
    /// Every word is single-quoted, so the line can be handed to a shell
    /// without any word splitting or expansion taking place.
    pub fn to_command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Wrap invocation so it runs on a remote host through SSH.
    ///
    /// The `destination` is passed as is, e.g., "user@host", after an
    /// end-of-options marker, so it is never taken as an SSH option.
    pub fn over_ssh(&self, destination: impl Into<String>) -> Self {
        let ssh = Invocation::new(SSH).arg("--").arg(destination);
        if self.has_secrets() {
            ssh.secret_arg(self.to_command_line())
        } else {
            ssh.arg(self.to_command_line())
        }
    }
}

impl Display for Invocation {
    /// Render quoted command line with secret arguments masked.
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let words = std::iter::once(shell_quote(&self.program))
            .chain(self.args.iter().enumerate().map(|(idx, arg)| {
                if self.secrets.contains(&idx) {
                    "'***'".to_string()
                } else {
                    shell_quote(arg)
                }
            }))
            .collect::<Vec<_>>();
        fmt.write_str(words.join(" ").as_str())
    }
}

/// Captured result of a finished program call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Program exited with zero status.
    pub success: bool,

    /// Exit code, if program was not killed by a signal.
    pub code: Option<i32>,

    /// Everything program wrote to stdout.
    pub stdout: String,

    /// Everything program wrote to stderr.
    pub stderr: String,
}

impl Captured {
    /// Brief message describing why program call failed.
    ///
    /// Uses stderr when the program wrote anything to it, otherwise falls back
    /// to the exit status.
    pub fn failure_reason(&self) -> String {
        // INVARIANT: Chomp trailing newlines.
        let stderr = self.stderr.trim_end_matches(['\r', '\n']);
        if !stderr.is_empty() {
            return stderr.to_string();
        }

        match self.code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".into(),
        }
    }
}

/// Layer of indirection for running external programs.
pub trait Executor {
    /// Run program to completion, capturing its output.
    ///
    /// A non-zero exit is _not_ an error here. Callers decide what a failed
    /// program call means through [`Captured::success`].
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if program cannot be started at all.
    fn capture(&self, invocation: &Invocation) -> Result<Captured>;

    /// Run program to completion with inherited stdin, stdout, and stderr.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if program cannot be started at all.
    /// - Return [`SyscallError::Failed`] if program exits with non-zero status.
    fn interactive(&self, invocation: &Invocation) -> Result<()>;
}

/// Run external programs through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Construct new system executor.
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SystemExecutor {
    fn capture(&self, invocation: &Invocation) -> Result<Captured> {
        debug!("capture: {invocation}");
        let output = Command::new(invocation.program())
            .args(invocation.arguments())
            .stdin(Stdio::null())
            .output()
            .map_err(|err| SyscallError::Spawn {
                source: err,
                program: invocation.program().into(),
            })?;

        Ok(Captured {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
        })
    }

    fn interactive(&self, invocation: &Invocation) -> Result<()> {
        debug!("interactive: {invocation}");
        let status = Command::new(invocation.program())
            .args(invocation.arguments())
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|err| SyscallError::Spawn {
                source: err,
                program: invocation.program().into(),
            })?;

        if !status.success() {
            return Err(SyscallError::Failed {
                program: invocation.program().into(),
                reason: match status.code() {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by signal".into(),
                },
            });
        }

        Ok(())
    }
}

/// External program execution error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program could not be started.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Program ran, but reported failure.
    #[error("command {program:?} failed: {reason}")]
    Failed { program: String, reason: String },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
