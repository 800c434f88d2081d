// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Execution targets.
//!
//! An installation lives either on the local file system, or on a remote host
//! reachable through SSH. The target decides where relative paths resolve to,
//! and whether program calls need to be forwarded over SSH.

use crate::syscall::Invocation;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Where an installation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Installation on local file system.
    Local {
        /// Absolute path to installation root.
        install_root: PathBuf,
    },

    /// Installation on remote host.
    Remote {
        /// User to log in as.
        user: String,

        /// Hostname to connect to.
        host: String,

        /// Absolute path to installation root on remote host.
        remote_root: PathBuf,
    },
}

impl ExecutionTarget {
    /// Construct new local target.
    pub fn local(install_root: impl Into<PathBuf>) -> Self {
        Self::Local {
            install_root: install_root.into(),
        }
    }

    /// Construct new remote target.
    pub fn remote(
        user: impl Into<String>,
        host: impl Into<String>,
        remote_root: impl Into<PathBuf>,
    ) -> Self {
        Self::Remote {
            user: user.into(),
            host: host.into(),
            remote_root: remote_root.into(),
        }
    }

    /// Installation root.
    pub fn root(&self) -> &Path {
        match self {
            Self::Local { install_root } => install_root.as_path(),
            Self::Remote { remote_root, .. } => remote_root.as_path(),
        }
    }

    /// Resolve path relative to installation root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root().join(relative)
    }

    /// SSH destination, i.e., "user@host", for remote targets.
    pub fn destination(&self) -> Option<String> {
        match self {
            Self::Local { .. } => None,
            Self::Remote { user, host, .. } => Some(format!("{user}@{host}")),
        }
    }

    /// Check if target is remote.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Adapt program call to run against this target.
    ///
    /// Local targets run the invocation as is. Remote targets forward it
    /// through SSH.
    pub fn wrap(&self, invocation: Invocation) -> Invocation {
        match self.destination() {
            Some(destination) => invocation.over_ssh(destination),
            None => invocation,
        }
    }
}

impl Display for ExecutionTarget {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local { install_root } => {
                write!(fmt, "{}", install_root.display())
            }
            Self::Remote {
                user,
                host,
                remote_root,
            } => write!(fmt, "{user}@{host}:{}", remote_root.display()),
        }
    }
}
