// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation provisioning.
//!
//! Steps to refresh and (re)install an X2CRM installation from its git
//! checkout:
//!
//! 1. Refresh database, i.e., drop it if it exists and create it anew.
//! 2. Prune generated assets from git checkout.
//! 3. Mirror git checkout into working file set.
//! 4. Publish working file set, either by handing it to the web server user
//!    locally, or by mirroring the application root to a remote web root and
//!    handing that to the web server user remotely.
//!
//! Every step stops at the first external command that fails.

use crate::{
    config::{DatabaseSettings, DeployConfig, APP_SUBDIR},
    syscall::{Executor, Invocation, SyscallError, SystemExecutor},
    target::ExecutionTarget,
};

use glob::{glob, Pattern};
use std::{
    fs::remove_file,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Directory of generated assets relative to git checkout.
pub const ASSETS_SUBDIR: &str = "X2CRM/x2engine/assets";

/// Run provisioning steps through an executor.
#[derive(Debug)]
pub struct Provisioner<E = SystemExecutor>
where
    E: Executor,
{
    executor: E,
    sudo: bool,
}

impl<E> Provisioner<E>
where
    E: Executor,
{
    /// Construct new provisioner.
    ///
    /// Local file set manipulation runs through `sudo` by default.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            sudo: true,
        }
    }

    /// Choose whether to run privileged steps through `sudo`.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    fn privileged(&self, program: &str) -> Invocation {
        if self.sudo {
            Invocation::new("sudo").arg(program)
        } else {
            Invocation::new(program)
        }
    }

    /// Drop database if it exists, and create it again.
    ///
    /// A missing database is not an error. Runs the MySQL client on the
    /// remote host for remote targets.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::InvalidDatabaseName`] if database name is
    ///   not a plain identifier.
    /// - Return [`ProvisionError::Command`] if MySQL client reports failure.
    /// - Return [`ProvisionError::Syscall`] if MySQL client cannot be started.
    #[instrument(skip(self, database), level = "debug")]
    pub fn refresh_database(
        &self,
        database: &DatabaseSettings,
        target: &ExecutionTarget,
    ) -> Result<()> {
        let name = database.name.as_str();
        if name.is_empty()
            || !name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
        {
            return Err(ProvisionError::InvalidDatabaseName { name: name.into() });
        }

        info!("refresh database {name:?}");
        let mysql = Invocation::new("mysql")
            .args(["-u", database.user.as_str()])
            .secret_arg(format!("-p{}", database.password))
            .arg("-e")
            .arg(format!(
                "drop database if exists {name}; create database {name}"
            ));

        let captured = self.executor.capture(&target.wrap(mysql))?;
        if !captured.success {
            return Err(ProvisionError::Command {
                step: "refresh database",
                reason: captured.failure_reason(),
            });
        }

        Ok(())
    }

    /// Remove generated assets from git checkout.
    ///
    /// Deletes top-level files of the assets directory whose names do not
    /// start with 't'. Directories are left alone.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Pattern`] if assets path makes an invalid
    ///   glob pattern.
    /// - Return [`ProvisionError::Glob`] if an entry cannot be inspected.
    /// - Return [`ProvisionError::RemoveAsset`] if a file cannot be removed.
    #[instrument(skip(self, gitdir), level = "debug")]
    pub fn prune_assets(&self, gitdir: impl AsRef<Path>) -> Result<usize> {
        let assets = gitdir.as_ref().join(ASSETS_SUBDIR);
        let pattern = format!(
            "{}/[!t]*",
            Pattern::escape(assets.to_string_lossy().as_ref())
        );

        let mut removed = 0;
        for entry in glob(&pattern)? {
            let path = entry?;
            if !path.is_file() {
                debug!("skip asset directory {:?}", path.display());
                continue;
            }

            debug!("remove asset {:?}", path.display());
            remove_file(&path).map_err(|err| ProvisionError::RemoveAsset {
                source: err,
                path: path.clone(),
            })?;
            removed += 1;
        }

        info!("pruned {removed} assets from {:?}", assets.display());
        Ok(removed)
    }

    /// Mirror git checkout into working file set.
    ///
    /// Files in working file set that are not in git checkout are deleted.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Syscall`] if `rsync` fails.
    #[instrument(skip(self, gitdir, working_dir), level = "debug")]
    pub fn sync_working_copy(
        &self,
        gitdir: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
    ) -> Result<()> {
        info!(
            "mirror {:?} into {:?}",
            gitdir.as_ref().display(),
            working_dir.as_ref().display()
        );
        let rsync = self
            .privileged("rsync")
            .args(["-avc", "--delete", "--"])
            .arg(format!("{}/", gitdir.as_ref().display()))
            .arg(working_dir.as_ref().to_string_lossy());
        self.executor.interactive(&rsync)?;

        Ok(())
    }

    /// Publish working file set to target.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Syscall`] if `chown`, `rsync`, or `ssh`
    ///   fails.
    #[instrument(skip(self, working_dir), level = "debug")]
    pub fn publish(
        &self,
        working_dir: impl AsRef<Path>,
        target: &ExecutionTarget,
        owner: &str,
    ) -> Result<()> {
        let working_dir = working_dir.as_ref();
        match target.destination() {
            None => {
                info!("hand {:?} to owner {owner}", working_dir.display());
                let chown = self
                    .privileged("chown")
                    .args(["-R", owner])
                    .arg(working_dir.to_string_lossy());
                self.executor.interactive(&chown)?;
            }
            Some(destination) => {
                let source = working_dir.join(APP_SUBDIR);
                let root = target.root();
                info!("mirror {:?} to {target}", source.display());
                let rsync = Invocation::new("rsync")
                    .args(["-avzcO", "--delete", "--"])
                    .arg(format!("{}/", source.display()))
                    .arg(format!("{destination}:{}", root.display()));
                self.executor.interactive(&rsync)?;

                info!("hand {target} to owner {owner}");
                let chown = Invocation::new("sudo")
                    .args(["chown", "-R", owner])
                    .arg(root.to_string_lossy())
                    .over_ssh(destination);
                self.executor.interactive(&chown)?;
            }
        }

        Ok(())
    }

    /// Reinstall application from git checkout.
    ///
    /// Prunes assets, mirrors git checkout into working file set, then
    /// publishes working file set to application target of configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Config`] if required settings are missing.
    /// - Return any error of the individual steps.
    pub fn install(&self, config: &DeployConfig) -> Result<()> {
        let gitdir = config.gitdir()?;
        let working_dir = config.working_dir()?;
        let target = config.app_target()?;

        self.prune_assets(gitdir)?;
        self.sync_working_copy(gitdir, working_dir)?;
        self.publish(working_dir, &target, config.web_owner.as_str())?;

        Ok(())
    }
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Required configuration is missing.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// External program cannot be started, or fails.
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    /// External program reports failure for a step.
    #[error("failed to {step}: {reason}")]
    Command { step: &'static str, reason: String },

    /// Database name is not a plain identifier.
    #[error("invalid database name {name:?}")]
    InvalidDatabaseName { name: String },

    /// Assets glob pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Assets entry cannot be inspected.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// Asset file cannot be removed.
    #[error("failed to remove asset {:?}", path.display())]
    RemoveAsset {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
