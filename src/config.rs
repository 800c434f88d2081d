// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the flag registry file, and the explicit deployment
//! configuration that the command-line boundary builds once per run. File I/O
//! is left to the caller to figure out.

use crate::target::ExecutionTarget;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Flag registry file layout.
///
/// A registry file lists every flag that x2deploy knows how to toggle. Each
/// flag names the configuration file that holds its constant, relative to an
/// installation root, and a locator pattern whose two capture groups match
/// the constant's name and its current value respectively.
///
/// # General Layout
///
/// ```toml
/// [[flag]]
/// key = "d"
/// description = "Yii debug mode"
/// path = "constants.php"
/// locator = '''(define\('YII_DEBUG',[[:space:]]*)([^)]*)'''
/// ```
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RegistryDefinition {
    /// Listing of flag entries.
    #[serde(rename = "flag", default)]
    pub flags: Vec<FlagEntry>,
}

impl FromStr for RegistryDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for RegistryDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Single flag entry of registry file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct FlagEntry {
    /// Symbolic key of flag.
    pub key: String,

    /// Brief description of what the flag toggles.
    #[serde(default)]
    pub description: String,

    /// Path to configuration file relative to installation root.
    pub path: PathBuf,

    /// Pattern locating constant and its value inside configuration file.
    pub locator: String,
}

/// Database credentials and name.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// User allowed to drop and create its own database.
    pub user: String,

    /// Password of user.
    pub password: String,

    /// Name of database to install X2CRM into.
    pub name: String,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("DatabaseSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

/// Remote host to deploy to.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct RemoteSettings {
    /// User to connect to remote host with.
    pub user: String,

    /// Hostname of remote host.
    pub server: String,

    /// Web root that X2CRM is deployed to on remote host.
    pub webroot: PathBuf,
}

/// Explicit deployment configuration.
///
/// Built once at the command-line boundary, and handed by reference to
/// everything else. Nothing past this point looks at the environment.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DeployConfig {
    /// Directory of X2CRM git repository.
    pub gitdir: Option<PathBuf>,

    /// Directory of working file set for X2CRM.
    pub working_dir: Option<PathBuf>,

    /// Database to refresh.
    pub database: Option<DatabaseSettings>,

    /// Remote host, if deploying remotely.
    pub remote: Option<RemoteSettings>,

    /// Owner to hand installed files to.
    pub web_owner: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            gitdir: None,
            working_dir: None,
            database: None,
            remote: None,
            web_owner: DEFAULT_WEB_OWNER.into(),
        }
    }
}

/// Owner of web server files on stock Debian and Ubuntu hosts (www-data).
pub const DEFAULT_WEB_OWNER: &str = "33";

/// Application root inside the X2CRM repository layout.
pub const APP_SUBDIR: &str = "X2CRM/x2engine";

impl DeployConfig {
    /// Directory of X2CRM git repository.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if no git directory was given.
    pub fn gitdir(&self) -> Result<&Path> {
        self.gitdir
            .as_deref()
            .ok_or(ConfigError::Missing("--gitdir or GITDIR"))
    }

    /// Directory of working file set.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if no working directory was given.
    pub fn working_dir(&self) -> Result<&Path> {
        self.working_dir
            .as_deref()
            .ok_or(ConfigError::Missing("--directory or WORKINGDIR"))
    }

    /// Database settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if database settings are incomplete.
    pub fn database(&self) -> Result<&DatabaseSettings> {
        self.database.as_ref().ok_or(ConfigError::Missing(
            "--mysqluser, --mysqlpass, and --database (or MYSQLUSER, MYSQLPASS, MYSQLDATABASE)",
        ))
    }

    /// Execution target of installed application.
    ///
    /// Remote deployments target the remote web root. Local deployments target
    /// the application root inside the working file set.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] if local deployment has no working
    ///   directory.
    pub fn app_target(&self) -> Result<ExecutionTarget> {
        match &self.remote {
            Some(remote) => Ok(ExecutionTarget::remote(
                &remote.user,
                &remote.server,
                &remote.webroot,
            )),
            None => Ok(ExecutionTarget::local(self.working_dir()?.join(APP_SUBDIR))),
        }
    }

    /// Execution target for host-level commands, e.g., database refresh.
    pub fn host_target(&self) -> ExecutionTarget {
        match &self.remote {
            Some(remote) => {
                ExecutionTarget::remote(&remote.user, &remote.server, &remote.webroot)
            }
            None => ExecutionTarget::local("/"),
        }
    }
}

/// Perform shell expansion on a path, e.g., "~/x2crm" or "$HOME/x2crm".
///
/// # Errors
///
/// - Return [`ConfigError::ShellExpansion`] if a variable cannot be expanded.
pub fn expand_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref().to_string_lossy();
    Ok(PathBuf::from(
        shellexpand::full(path.as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Required setting was not provided.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn deserialize_registry_definition() -> anyhow::Result<()> {
        let result: RegistryDefinition = indoc! {r#"
            [[flag]]
            key = "d"
            description = "debug mode"
            path = "constants.cfg"
            locator = '''(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)'''

            [[flag]]
            key = "e"
            path = "protected/config/emailConfig.php"
            locator = '''(\$debug[[:space:]]*=[[:space:]]*)([^;]*)'''
        "#}
        .parse()?;

        let expect = RegistryDefinition {
            flags: vec![
                FlagEntry {
                    key: "d".into(),
                    description: "debug mode".into(),
                    path: "constants.cfg".into(),
                    locator: r"(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)".into(),
                },
                FlagEntry {
                    key: "e".into(),
                    description: String::new(),
                    path: "protected/config/emailConfig.php".into(),
                    locator: r"(\$debug[[:space:]]*=[[:space:]]*)([^;]*)".into(),
                },
            ],
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_registry_definition() -> anyhow::Result<()> {
        let definition = RegistryDefinition {
            flags: vec![FlagEntry {
                key: "d".into(),
                description: "debug mode".into(),
                path: "constants.cfg".into(),
                locator: "(DEBUG_MODE = )(.*)".into(),
            }],
        };

        // Whatever the exact rendering, it must read back as the same layout.
        let result: RegistryDefinition = definition.to_string().parse()?;
        assert_eq!(result, definition);

        Ok(())
    }

    #[test]
    fn local_app_target_lives_in_working_dir() -> anyhow::Result<()> {
        let config = DeployConfig {
            working_dir: Some("/home/dev/x2work".into()),
            ..Default::default()
        };
        assert_eq!(
            config.app_target()?,
            ExecutionTarget::local("/home/dev/x2work/X2CRM/x2engine")
        );

        let config = DeployConfig::default();
        assert!(matches!(
            config.app_target(),
            Err(ConfigError::Missing(_))
        ));

        Ok(())
    }

    #[test]
    fn remote_app_target_is_webroot() -> anyhow::Result<()> {
        let config = DeployConfig {
            remote: Some(RemoteSettings {
                user: "deploy".into(),
                server: "crm.example.com".into(),
                webroot: "/var/www/x2".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            config.app_target()?,
            ExecutionTarget::remote("deploy", "crm.example.com", "/var/www/x2")
        );

        Ok(())
    }

    #[test]
    fn database_settings_debug_hides_password() {
        let settings = DatabaseSettings {
            user: "x2".into(),
            password: "hunter2".into(),
            name: "x2crm".into(),
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[sealed_test(env = [("X2ROOT", "/opt/x2")])]
    fn expand_path_variables() -> anyhow::Result<()> {
        assert_eq!(expand_path("$X2ROOT/work")?, PathBuf::from("/opt/x2/work"));
        assert!(expand_path("$X2DEPLOY_SURELY_UNSET/work").is_err());

        Ok(())
    }
}
