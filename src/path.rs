// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Name of ship configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "oxiship.toml";

/// Determine absolute path to user's configuration directory for oxiship.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/oxiship` as the default.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigDir`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("oxiship"))
        .ok_or(NoConfigDir)
}

/// Determine path to ship configuration file.
///
/// Prefers `oxiship.toml` in the given working directory. Falls back to
/// `$XDG_CONFIG_HOME/oxiship/config.toml` otherwise.
///
/// # Errors
///
/// - Return [`NoConfigDir`] if working directory has no configuration file,
///   and configuration directory cannot be determined.
pub fn default_config_path(work_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let local = work_dir.as_ref().join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local);
    }

    config_dir().map(|path| path.join("config.toml"))
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigDir;

/// Friendly result alias :3
pub type Result<T, E = NoConfigDir> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_path_prefers_work_dir() -> anyhow::Result<()> {
        let work_dir = tempfile::tempdir()?;
        std::fs::write(work_dir.path().join(CONFIG_FILE_NAME), "")?;

        assert_eq!(
            default_config_path(work_dir.path())?,
            work_dir.path().join(CONFIG_FILE_NAME)
        );

        Ok(())
    }
}
