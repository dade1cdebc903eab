// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release plan for one archive.
//!
//! Derives every remote path that a deployment touches from the archive's file
//! name, and spells out the shell command used for each step of the release
//! sequence.

use crate::{config::RemoteLayout, release::transport::quote};

use std::path::Path;

/// Strip archive extension from archive file name.
///
/// Both `.tgz` and `.tar.gz` are recognized. Any other name is returned as is.
pub fn folder_name(archive_filename: &str) -> &str {
    archive_filename
        .strip_suffix(".tgz")
        .or_else(|| archive_filename.strip_suffix(".tar.gz"))
        .unwrap_or(archive_filename)
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// Remote paths and commands for deploying one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    /// Base name of archive.
    pub archive_filename: String,

    /// Archive base name without its extension.
    pub folder_name: String,

    /// Release directory receiving extracted contents.
    pub release: String,

    /// Hidden sibling of release directory used during extraction.
    pub staging: String,

    /// Remote location of uploaded archive.
    pub upload: String,

    /// Current alias symlink.
    pub current: String,

    /// Symlink prepared next to current alias before the swap.
    pub next: String,

    /// Top-level directory wrapped around archive contents.
    pub wrapper: String,
}

impl ReleasePlan {
    /// Construct new release plan.
    pub fn new(layout: &RemoteLayout, wrapper: impl Into<String>, archive: &Path) -> Self {
        let archive_filename = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder_name = folder_name(&archive_filename).to_string();

        Self {
            release: join(&layout.releases, &folder_name),
            staging: join(&layout.releases, &format!(".{folder_name}.staging")),
            upload: join(&layout.upload, &archive_filename),
            current: layout.current.clone(),
            next: format!("{}.next", layout.current.trim_end_matches('/')),
            wrapper: wrapper.into(),
            archive_filename,
            folder_name,
        }
    }

    /// Print "present" if release directory already exists.
    pub fn probe(&self) -> String {
        format!("if [ -d {} ]; then echo present; fi", quote(&self.release))
    }

    /// Start from empty staging directory.
    pub fn prepare(&self) -> String {
        let staging = quote(&self.staging);
        format!("rm -rf {staging} && mkdir -p {staging}")
    }

    /// Extract uploaded archive into staging directory.
    pub fn extract(&self) -> String {
        format!(
            "tar -xzf {} -C {}",
            quote(&self.upload),
            quote(&self.staging)
        )
    }

    /// Remove uploaded archive.
    pub fn cleanup(&self) -> String {
        format!("rm -f {}", quote(&self.upload))
    }

    /// Move wrapper directory into place as release directory.
    pub fn relocate(&self) -> String {
        format!(
            "mv -T {} {} && rmdir {}",
            quote(join(&self.staging, &self.wrapper)),
            quote(&self.release),
            quote(&self.staging)
        )
    }

    /// Point next symlink at release directory.
    pub fn link(&self) -> String {
        format!("ln -sfn {} {}", quote(&self.release), quote(&self.next))
    }

    /// Rename next symlink over current alias.
    pub fn activate(&self) -> String {
        format!("mv -Tf {} {}", quote(&self.next), quote(&self.current))
    }

    /// Remove whatever a failed deployment may have left behind.
    ///
    /// Never touches the current alias or any release directory.
    pub fn abandon(&self) -> String {
        format!(
            "rm -rf {} {} {}",
            quote(&self.staging),
            quote(&self.upload),
            quote(&self.next)
        )
    }
}

/// Print target of current alias, or nothing if it does not exist.
pub fn read_current(layout: &RemoteLayout) -> String {
    let current = quote(&layout.current);
    format!("if [ -L {current} ]; then readlink {current}; fi")
}

/// List entries of releases directory, or nothing if it does not exist.
pub fn list_releases(layout: &RemoteLayout) -> String {
    let releases = quote(&layout.releases);
    format!("if [ -d {releases} ]; then ls -1A {releases}; fi")
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("web_static_20250101120000.tgz", "web_static_20250101120000"; "tgz")]
    #[test_case("web_static_20250101120000.tar.gz", "web_static_20250101120000"; "tar gz")]
    #[test_case("web_static", "web_static"; "no extension")]
    #[test_case("site.tgz.bak", "site.tgz.bak"; "unknown extension")]
    #[test]
    fn strip_archive_extension(filename: &str, expect: &str) {
        assert_eq!(folder_name(filename), expect);
    }

    #[test]
    fn plan_from_default_layout() {
        let plan = ReleasePlan::new(
            &RemoteLayout::default(),
            "web_static",
            Path::new("versions/web_static_20250101120000.tgz"),
        );

        let expect = ReleasePlan {
            archive_filename: "web_static_20250101120000.tgz".into(),
            folder_name: "web_static_20250101120000".into(),
            release: "/data/web_static/releases/web_static_20250101120000".into(),
            staging: "/data/web_static/releases/.web_static_20250101120000.staging".into(),
            upload: "/tmp/web_static_20250101120000.tgz".into(),
            current: "/data/web_static/current".into(),
            next: "/data/web_static/current.next".into(),
            wrapper: "web_static".into(),
        };

        assert_eq!(plan, expect);
    }

    #[test]
    fn plan_commands() {
        let plan = ReleasePlan::new(
            &RemoteLayout::default(),
            "web_static",
            Path::new("versions/web_static_20250101120000.tgz"),
        );

        assert_eq!(
            plan.probe(),
            "if [ -d '/data/web_static/releases/web_static_20250101120000' ]; then echo present; fi"
        );
        assert_eq!(
            plan.extract(),
            "tar -xzf '/tmp/web_static_20250101120000.tgz' -C '/data/web_static/releases/.web_static_20250101120000.staging'"
        );
        assert_eq!(
            plan.relocate(),
            "mv -T '/data/web_static/releases/.web_static_20250101120000.staging/web_static' '/data/web_static/releases/web_static_20250101120000' && rmdir '/data/web_static/releases/.web_static_20250101120000.staging'"
        );
        assert_eq!(
            plan.activate(),
            "mv -Tf '/data/web_static/current.next' '/data/web_static/current'"
        );
    }

    #[test]
    fn plan_tolerates_trailing_slashes() {
        let layout = RemoteLayout {
            releases: "/srv/releases/".into(),
            upload: "/".into(),
            ..Default::default()
        };

        let plan = ReleasePlan::new(&layout, "web_static", Path::new("site_1.tgz"));

        assert_eq!(plan.release, "/srv/releases/site_1");
        assert_eq!(plan.upload, "/site_1.tgz");
    }
}
