// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that Oxiship uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Ship configuration layout.
///
/// All projects shipped by oxiship come with a __ship__ file. This file
/// details what gets packed, where releases land on each host, and which hosts
/// receive them.
///
/// # General Layout
///
/// A ship configuration is composed of four parts: package settings, remote
/// layout, SSH options, and the host listing. Hosts are deployed to in the
/// order they are listed.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ShipConfig {
    /// Settings for packing static assets.
    #[serde(default)]
    pub package: PackageSettings,

    /// Layout of releases on each host.
    #[serde(default)]
    pub remote: RemoteLayout,

    /// Options handed to `ssh` and `scp`.
    #[serde(default, skip_serializing_if = "SshSettings::is_empty")]
    pub ssh: SshSettings,

    /// Ordered listing of hosts to deploy to.
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
}

impl ShipConfig {
    /// Select hosts by address.
    ///
    /// An empty selection means every configured host. Unknown addresses are
    /// returned as the error value so the caller can report them.
    pub fn select_hosts(&self, addresses: &[String]) -> Result<Vec<Host>, Vec<String>> {
        if addresses.is_empty() {
            return Ok(self.hosts.clone());
        }

        let unknown = addresses
            .iter()
            .filter(|address| !self.hosts.iter().any(|host| &host.address == *address))
            .cloned()
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            return Err(unknown);
        }

        Ok(self
            .hosts
            .iter()
            .filter(|host| addresses.contains(&host.address))
            .cloned()
            .collect())
    }
}

impl FromStr for ShipConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ShipConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every local path field.
        config.package.source = expand_path(&config.package.source)?;
        config.package.versions = expand_path(&config.package.versions)?;
        for host in config.hosts.iter_mut() {
            if let Some(identity) = &host.identity {
                host.identity = Some(expand_path(identity)?);
            }
        }

        Ok(config)
    }
}

impl Display for ShipConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Package settings.
///
/// Determine what gets archived and where archives are kept locally.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageSettings {
    /// Directory of static assets to archive.
    pub source: PathBuf,

    /// Directory to store archives in.
    #[serde(default = "default_versions")]
    pub versions: PathBuf,

    /// Archive name prefix. Defaults to the name of the source directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Gitignore style patterns of source files to leave out of archives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
}

impl PackageSettings {
    /// Name of the top-level directory every archive wraps its contents in.
    pub fn wrapper_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "web_static".into())
    }

    /// Archive name prefix to use.
    pub fn archive_prefix(&self) -> String {
        self.prefix.clone().unwrap_or_else(|| self.wrapper_name())
    }
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            source: PathBuf::from("web_static"),
            versions: default_versions(),
            prefix: None,
            exclude: None,
        }
    }
}

fn default_versions() -> PathBuf {
    PathBuf::from("versions")
}

/// Remote release layout.
///
/// Paths here are interpreted by the shell of each host, so they are kept as
/// plain strings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RemoteLayout {
    /// Transport used to reach hosts.
    #[serde(default)]
    pub transport: TransportKind,

    /// Directory that holds every release directory.
    #[serde(default = "default_releases")]
    pub releases: String,

    /// Symlink selecting the live release.
    #[serde(default = "default_current")]
    pub current: String,

    /// Directory archives are uploaded to before extraction.
    #[serde(default = "default_upload")]
    pub upload: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            releases: default_releases(),
            current: default_current(),
            upload: default_upload(),
        }
    }
}

fn default_releases() -> String {
    "/data/web_static/releases".into()
}

fn default_current() -> String {
    "/data/web_static/current".into()
}

fn default_upload() -> String {
    "/tmp".into()
}

/// Transport used to reach hosts.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Remote hosts over `ssh` and `scp`.
    #[default]
    Ssh,

    /// The local machine through `sh`.
    Local,
}

/// Options for `ssh` and `scp`.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SshSettings {
    /// Extra `-o` options, e.g., "StrictHostKeyChecking=accept-new".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl SshSettings {
    /// Check if no option was given.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Target host.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Host {
    /// Address or host name.
    pub address: String,

    /// User to log in as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// SSH port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// SSH identity file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<PathBuf>,
}

impl Host {
    /// Construct new host from address alone.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// SSH destination, i.e., "user@address" or just "address".
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }
}

impl Display for Host {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.destination().as_str())
    }
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

    #[sealed_test(env = [("SITE", "/srv/site")])]
    fn deserialize_ship_config() -> anyhow::Result<()> {
        let result: ShipConfig = r#"
            [package]
            source = "$SITE/web_static"
            versions = "$SITE/versions"
            exclude = ["*.swp", "drafts/"]

            [remote]
            transport = "ssh"
            releases = "/data/web_static/releases"
            current = "/data/web_static/current"
            upload = "/tmp"

            [ssh]
            options = ["StrictHostKeyChecking=accept-new"]

            [[host]]
            address = "34.73.0.174"
            user = "ubuntu"
            identity = "$SITE/id_rsa"

            [[host]]
            address = "35.196.78.105"
            port = 2222
        "#
        .parse()?;

        let expect = ShipConfig {
            package: PackageSettings {
                source: "/srv/site/web_static".into(),
                versions: "/srv/site/versions".into(),
                prefix: None,
                exclude: Some(vec!["*.swp".into(), "drafts/".into()]),
            },
            remote: RemoteLayout::default(),
            ssh: SshSettings {
                options: vec!["StrictHostKeyChecking=accept-new".into()],
            },
            hosts: vec![
                Host {
                    address: "34.73.0.174".into(),
                    user: Some("ubuntu".into()),
                    port: None,
                    identity: Some("/srv/site/id_rsa".into()),
                },
                Host {
                    address: "35.196.78.105".into(),
                    user: None,
                    port: Some(2222),
                    identity: None,
                },
            ],
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_minimal_ship_config() -> anyhow::Result<()> {
        let result: ShipConfig = r#"
            [package]
            source = "web_static"
        "#
        .parse()?;

        assert_eq!(result, ShipConfig::default());
        assert_eq!(result.package.wrapper_name(), "web_static");
        assert_eq!(result.package.archive_prefix(), "web_static");

        Ok(())
    }

    #[test]
    fn serialize_ship_config() {
        let result = ShipConfig {
            package: PackageSettings {
                prefix: Some("site".into()),
                ..Default::default()
            },
            remote: RemoteLayout {
                transport: TransportKind::Local,
                ..Default::default()
            },
            ssh: SshSettings::default(),
            hosts: vec![Host {
                address: "34.73.0.174".into(),
                user: Some("ubuntu".into()),
                port: Some(22),
                identity: None,
            }],
        }
        .to_string();

        let expect = indoc! {r#"
            [package]
            source = "web_static"
            versions = "versions"
            prefix = "site"

            [remote]
            transport = "local"
            releases = "/data/web_static/releases"
            current = "/data/web_static/current"
            upload = "/tmp"

            [[host]]
            address = "34.73.0.174"
            user = "ubuntu"
            port = 22
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn select_hosts_by_address() {
        let config = ShipConfig {
            hosts: vec![Host::new("a"), Host::new("b"), Host::new("c")],
            ..Default::default()
        };

        assert_eq!(config.select_hosts(&[]), Ok(config.hosts.clone()));
        assert_eq!(
            config.select_hosts(&["c".into(), "a".into()]),
            Ok(vec![Host::new("a"), Host::new("c")])
        );
        assert_eq!(
            config.select_hosts(&["a".into(), "z".into()]),
            Err(vec!["z".into()])
        );
    }
}
