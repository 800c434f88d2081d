// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Flag-settings toggler.
//!
//! Translate symbolic flags into in-place rewrites of constants inside known
//! configuration files of an installation. Values are written with `sed`, and
//! read back by matching the same locator pattern against file content. Both
//! directions work against local installations directly, and against remote
//! installations through SSH.
//!
//! The toggler is stateless. All state lives in the configuration files it
//! edits, which belong to the installation, not to x2deploy.

use crate::{
    registry::{FlagDescriptor, FlagKey, Registry},
    shell::sed_substitution,
    syscall::{Executor, Invocation, SyscallError, SystemExecutor},
    target::ExecutionTarget,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{metadata, read},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Single flag and the value it should hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSetting {
    pub key: FlagKey,
    pub value: String,
}

impl FlagSetting {
    /// Construct new flag setting.
    pub fn new(key: impl Into<FlagKey>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for FlagSetting {
    type Err = ParseSettingError;

    /// Parse "key=value" pair. The value may itself contain '='.
    fn from_str(pair: &str) -> Result<Self, Self::Err> {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self::new(key, value)),
            _ => Err(ParseSettingError(pair.into())),
        }
    }
}

impl Display for FlagSetting {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}={}", self.key, self.value)
    }
}

/// Setting is not a "key=value" pair.
#[derive(Clone, Debug, thiserror::Error)]
#[error("expected key=value, found {0:?}")]
pub struct ParseSettingError(String);

/// Ordered listing of flag settings to apply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToggleRequest {
    settings: Vec<FlagSetting>,
}

impl ToggleRequest {
    /// Construct new empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append flag setting to request.
    pub fn set(mut self, key: impl Into<FlagKey>, value: impl Into<String>) -> Self {
        self.settings.push(FlagSetting::new(key, value));
        self
    }

    /// Iterate through settings in caller order.
    pub fn iter(&self) -> impl Iterator<Item = &FlagSetting> {
        self.settings.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

impl FromIterator<FlagSetting> for ToggleRequest {
    fn from_iter<I: IntoIterator<Item = FlagSetting>>(iter: I) -> Self {
        Self {
            settings: iter.into_iter().collect(),
        }
    }
}

/// Rewrite and read flag values of an installation.
#[derive(Debug)]
pub struct Toggler<'r, E = SystemExecutor>
where
    E: Executor,
{
    registry: &'r Registry,
    executor: E,
}

impl<'r, E> Toggler<'r, E>
where
    E: Executor,
{
    /// Construct new toggler over a flag registry.
    pub fn new(registry: &'r Registry, executor: E) -> Self {
        Self { registry, executor }
    }

    /// Apply every flag setting of request to target.
    ///
    /// Every key is looked up before any file is touched, so an unknown key
    /// leaves the installation as is. Settings are then applied one at a time
    /// in request order. Stops at the first failing setting. Settings applied
    /// before it stay applied.
    ///
    /// # Errors
    ///
    /// - Return [`ToggleError::UnknownFlag`] if a key is not registered.
    /// - Return [`ToggleError::InvalidValue`] if a value spans multiple lines.
    /// - Return [`ToggleError::ValueNotFound`] if a file has no assignment
    ///   matching the locator of its flag.
    /// - Return [`ToggleError::Unreadable`] if a local file cannot be read.
    /// - Return [`ToggleError::SubstitutionFailed`] if a local file is missing,
    ///   is not writable, or `sed` fails.
    /// - Return [`ToggleError::TransportFailure`] if SSH reports failure.
    /// - Return [`ToggleError::Spawn`] if `sed` or `ssh` cannot be started.
    #[instrument(skip(self, request), level = "debug")]
    pub fn apply(&self, target: &ExecutionTarget, request: &ToggleRequest) -> Result<()> {
        let resolved = request
            .iter()
            .map(|setting| {
                self.lookup(setting.key.as_str())
                    .map(|descriptor| (descriptor, setting.value.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;

        for (descriptor, value) in resolved {
            self.apply_one(target, descriptor, value)?;
        }

        Ok(())
    }

    /// Read current value of flag from target.
    ///
    /// # Errors
    ///
    /// - Return [`ToggleError::UnknownFlag`] if key is not registered.
    /// - Return [`ToggleError::Unreadable`] if local file cannot be read.
    /// - Return [`ToggleError::TransportFailure`] if SSH reports failure.
    /// - Return [`ToggleError::ValueNotFound`] if file has no matching
    ///   assignment.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, target: &ExecutionTarget, key: &str) -> Result<String> {
        let descriptor = self.lookup(key)?;
        let path = target.resolve(descriptor.target_path());
        let content = self.fetch(target, descriptor, &path)?;

        descriptor
            .extract(&content)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ToggleError::ValueNotFound {
                flag: descriptor.key().clone(),
                path,
            })
    }

    fn lookup(&self, key: &str) -> Result<&'r FlagDescriptor> {
        self.registry
            .get(key)
            .ok_or_else(|| ToggleError::UnknownFlag { key: key.into() })
    }

    fn apply_one(
        &self,
        target: &ExecutionTarget,
        descriptor: &FlagDescriptor,
        value: &str,
    ) -> Result<()> {
        let flag = descriptor.key();
        let path = target.resolve(descriptor.target_path());
        let instruction = sed_substitution(
            descriptor.locator_pattern(),
            descriptor.delimiter(),
            value,
        )
        .ok_or_else(|| ToggleError::InvalidValue { flag: flag.clone() })?;

        let sed = Invocation::new("sed")
            .args(["-i", "-E", "-e"])
            .arg(instruction)
            .arg("--")
            .arg(path.to_string_lossy());

        if !target.is_remote() {
            self.check_local_file(descriptor, &path)?;
        }

        // INVARIANT: Nothing is written unless locator matches.
        let content = self.fetch(target, descriptor, &path)?;
        match descriptor.count_matches(&content) {
            0 => {
                return Err(ToggleError::ValueNotFound {
                    flag: flag.clone(),
                    path,
                })
            }
            1 => debug!("flag {flag} located in {:?}", path.display()),
            n => warn!("flag {flag} matches {n} assignments in {:?}", path.display()),
        }

        match target.destination() {
            None => {
                let captured = self.executor.capture(&sed)?;
                if !captured.success {
                    return Err(ToggleError::SubstitutionFailed {
                        flag: flag.clone(),
                        path,
                        reason: captured.failure_reason(),
                    });
                }
            }
            Some(destination) => {
                let captured = self.executor.capture(&sed.over_ssh(&destination))?;
                if !captured.success {
                    return Err(ToggleError::TransportFailure {
                        flag: flag.clone(),
                        destination,
                        reason: captured.failure_reason(),
                    });
                }
            }
        }

        info!("set flag {flag} to {value:?} in {target}");
        Ok(())
    }

    fn check_local_file(&self, descriptor: &FlagDescriptor, path: &Path) -> Result<()> {
        let failed = |reason: &str| ToggleError::SubstitutionFailed {
            flag: descriptor.key().clone(),
            path: path.into(),
            reason: reason.into(),
        };

        let meta = metadata(path).map_err(|err| failed(err.to_string().as_str()))?;
        if !meta.is_file() {
            return Err(failed("not a regular file"));
        }

        if meta.permissions().readonly() {
            return Err(failed("file is not writable"));
        }

        Ok(())
    }

    /// Fetch file content from target.
    ///
    /// Invalid UTF-8 is replaced lossily on both local and remote targets.
    fn fetch(
        &self,
        target: &ExecutionTarget,
        descriptor: &FlagDescriptor,
        path: &Path,
    ) -> Result<String> {
        match target.destination() {
            None => read(path)
                .map(|bytes| String::from_utf8_lossy(bytes.as_slice()).into_owned())
                .map_err(|err| ToggleError::Unreadable {
                    source: err,
                    flag: descriptor.key().clone(),
                    path: path.into(),
                }),
            Some(destination) => {
                let cat = Invocation::new("cat")
                    .arg("--")
                    .arg(path.to_string_lossy())
                    .over_ssh(&destination);
                let captured = self.executor.capture(&cat)?;
                if !captured.success {
                    return Err(ToggleError::TransportFailure {
                        flag: descriptor.key().clone(),
                        destination,
                        reason: captured.failure_reason(),
                    });
                }

                Ok(captured.stdout)
            }
        }
    }
}

/// Flag toggling error types.
#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    /// Flag key is not in registry.
    #[error("unknown flag {key:?}")]
    UnknownFlag { key: String },

    /// File has no assignment matching locator of flag.
    #[error("no value for flag {flag} found in {:?}", path.display())]
    ValueNotFound { flag: FlagKey, path: PathBuf },

    /// Local substitution could not be performed.
    #[error("failed to set flag {flag} in {:?}: {reason}", path.display())]
    SubstitutionFailed {
        flag: FlagKey,
        path: PathBuf,
        reason: String,
    },

    /// Remote-execution transport reported failure.
    #[error("remote command for flag {flag} on {destination} failed: {reason}")]
    TransportFailure {
        flag: FlagKey,
        destination: String,
        reason: String,
    },

    /// Local file cannot be read.
    #[error("failed to read flag {flag} from {:?}", path.display())]
    Unreadable {
        #[source]
        source: std::io::Error,
        flag: FlagKey,
        path: PathBuf,
    },

    /// Value cannot be written as a single line.
    #[error("value for flag {flag} cannot span multiple lines")]
    InvalidValue { flag: FlagKey },

    /// External program cannot be started.
    #[error(transparent)]
    Spawn(#[from] SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = ToggleError> = std::result::Result<T, E>;
