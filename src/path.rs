// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that x2deploy reads
//! its settings from.

use std::path::PathBuf;

/// Determine default absolute path to user flag registry file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/x2deploy/flags.toml` as the
/// default absolute path for a user flag registry. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_registry_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("x2deploy").join("flags.toml"))
        .ok_or(NoConfigHome)
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigHome;

/// Friendly result alias :3
pub type Result<T, E = NoConfigHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[cfg(target_os = "linux")]
    #[sealed_test(env = [("XDG_CONFIG_HOME", "/tmp/x2deploy-config")])]
    fn registry_file_under_xdg_config_home() -> anyhow::Result<()> {
        assert_eq!(
            default_registry_file()?,
            PathBuf::from("/tmp/x2deploy-config/x2deploy/flags.toml")
        );

        Ok(())
    }
}
