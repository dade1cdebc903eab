// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release archive packing.
//!
//! Utilities to pack a directory of static assets into a single compressed
//! __archive__, and to inspect existing archives before they get shipped.
//!
//! # Archive Layout
//!
//! Every archive is a gzip compressed tarball named after the moment it was
//! packed, e.g., `versions/web_static_20250101120000.tgz`. The timestamp sorts
//! lexically, and is unique at second granularity. The contents of the source
//! directory are always wrapped in a single top-level directory named after the
//! source directory itself:
//!
//! ```text
//! web_static/
//! web_static/index.html
//! web_static/styles/main.css
//! ```
//!
//! Deployment relies on this wrapper directory to move the extracted contents
//! into a release directory in one rename. Thus, archives that lack it are
//! rejected before anything gets shipped.
//!
//! # Atomic Creation
//!
//! Archives are written to a hidden temporary file inside the versions
//! directory, and only renamed into place once complete. A failed pack never
//! leaves a partial archive behind. Archives are never modified or removed
//! once created.

use crate::{config::PackageSettings, ErrorKind};

use chrono::{Local, NaiveDateTime};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::{
    collections::BTreeSet,
    fs::{metadata, File},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Format of the timestamp embedded in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Extension of every archive.
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Build archive file name from prefix and timestamp.
///
/// Produces `<prefix>_<YYYYMMDDHHMMSS>.tgz`.
pub fn archive_name(prefix: impl AsRef<str>, stamp: NaiveDateTime) -> String {
    format!(
        "{}_{}.{ARCHIVE_EXTENSION}",
        prefix.as_ref(),
        stamp.format(TIMESTAMP_FORMAT)
    )
}

/// Packed archive on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    path: PathBuf,
    size: u64,
}

impl Archive {
    /// Open existing archive.
    ///
    /// Size is taken from the file system, not from what was written.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::NotFound`] if no file exists at path.
    /// - Return [`ArchiveError::Open`] if file metadata cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        if !path.is_file() {
            return Err(ArchiveError::NotFound { path });
        }

        let size = metadata(&path)
            .map_err(|err| ArchiveError::Open {
                source: err,
                path: path.clone(),
            })?
            .len();

        Ok(Self { path, size })
    }

    /// Path to archive.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Size of archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Base name of archive file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Check that archive wraps everything in one top-level directory.
    ///
    /// Reads through every entry of the archive without extracting anything.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Open`] if archive cannot be opened.
    /// - Return [`ArchiveError::Read`] if archive is not a readable tarball.
    /// - Return [`ArchiveError::MissingWrapper`] if any entry lives outside of
    ///   the expected wrapper directory.
    #[instrument(skip(self), level = "debug")]
    pub fn check_wrapper(&self, wrapper: &str) -> Result<(), ArchiveError> {
        let read_error = |err: std::io::Error| ArchiveError::Read {
            source: err,
            path: self.path.clone(),
        };

        let file = File::open(&self.path).map_err(|err| ArchiveError::Open {
            source: err,
            path: self.path.clone(),
        })?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        let mut top_level = BTreeSet::new();
        let mut wrapper_is_dir = true;
        for entry in archive.entries().map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            let path = entry.path().map_err(read_error)?;
            let names = path
                .components()
                .filter_map(|component| match component {
                    Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>();

            // INVARIANT: Wrapper itself may only ever be a directory.
            if names.len() == 1 && !entry.header().entry_type().is_dir() {
                wrapper_is_dir = false;
            }

            if let Some(top) = names.into_iter().next() {
                top_level.insert(top);
            }
        }

        debug!("top-level entries of {:?}: {top_level:?}", self.path.display());
        if wrapper_is_dir && top_level.len() == 1 && top_level.contains(wrapper) {
            return Ok(());
        }

        Err(ArchiveError::MissingWrapper {
            path: self.path.clone(),
            expected: wrapper.into(),
            found: top_level.into_iter().collect(),
        })
    }
}

/// Pack static assets into archives.
#[derive(Debug, Clone)]
pub struct Packager {
    source: PathBuf,
    versions: PathBuf,
    prefix: String,
    wrapper: String,
    exclude: Vec<String>,
}

impl Packager {
    /// Construct new packager from package settings.
    pub fn new(settings: &PackageSettings) -> Self {
        Self {
            source: settings.source.clone(),
            versions: settings.versions.clone(),
            prefix: settings.archive_prefix(),
            wrapper: settings.wrapper_name(),
            exclude: settings.exclude.clone().unwrap_or_default(),
        }
    }

    /// Pack source directory stamped with current local time.
    ///
    /// # Errors
    ///
    /// See [`Packager::pack_at`].
    pub fn pack(&self) -> Result<Archive> {
        self.pack_at(Local::now().naive_local())
    }

    /// Pack source directory stamped with given time.
    ///
    /// Creates the versions directory if missing.
    ///
    /// # Errors
    ///
    /// - Return [`PackError::MissingSource`] if source is not a directory.
    /// - Return [`PackError::CreateVersions`] if versions directory cannot be
    ///   created.
    /// - Return [`PackError::Exists`] if an archive with the same timestamp
    ///   was already packed.
    /// - Return [`PackError::Walk`] if source directory cannot be traversed.
    /// - Return [`PackError::Write`] if archive cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn pack_at(&self, stamp: NaiveDateTime) -> Result<Archive> {
        if !self.source.is_dir() {
            return Err(PackError::MissingSource {
                source_dir: self.source.clone(),
            });
        }

        mkdirp::mkdirp(&self.versions).map_err(|err| PackError::CreateVersions {
            source: err,
            versions: self.versions.clone(),
        })?;

        let output = self.versions.join(archive_name(&self.prefix, stamp));
        if output.exists() {
            return Err(PackError::Exists { output });
        }

        info!(
            "Packing {} to {}",
            self.source.display(),
            output.display()
        );

        let write_error = |err: std::io::Error| PackError::Write {
            source: err,
            output: output.clone(),
        };

        // INVARIANT: Only a complete archive may ever carry the final name.
        let staged = tempfile::Builder::new()
            .prefix(".")
            .suffix(".partial")
            .tempfile_in(&self.versions)
            .map_err(write_error)?;
        self.write_archive(staged.as_file(), &output)?;
        staged.persist_noclobber(&output).map_err(|err| {
            if err.error.kind() == std::io::ErrorKind::AlreadyExists {
                PackError::Exists {
                    output: output.clone(),
                }
            } else {
                write_error(err.error)
            }
        })?;

        let archive = Archive::open(&output)?;
        info!(
            "{} packed: {} -> {} Bytes",
            self.source.display(),
            archive.path().display(),
            archive.size()
        );

        Ok(archive)
    }

    fn write_archive(&self, file: &File, output: &Path) -> Result<()> {
        let write_error = |err: std::io::Error| PackError::Write {
            source: err,
            output: output.to_path_buf(),
        };

        let mut overrides = OverrideBuilder::new(&self.source);
        for pattern in &self.exclude {
            // INVARIANT: Override globs whitelist by default, so negate them.
            overrides.add(&format!("!{pattern}"))?;
        }

        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);

        let walker = WalkBuilder::new(&self.source)
            .standard_filters(false)
            .follow_links(false)
            .overrides(overrides.build()?)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(&self.source) else {
                continue;
            };

            let name = if relative.as_os_str().is_empty() {
                PathBuf::from(&self.wrapper)
            } else {
                Path::new(&self.wrapper).join(relative)
            };

            debug!("append {:?}", name.display());
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(write_error)?;
        }

        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .and_then(|file| file.sync_all())
            .map_err(write_error)?;

        Ok(())
    }
}

/// Archive inspection error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Archive does not exist.
    #[error("archive {:?} does not exist", path.display())]
    NotFound { path: PathBuf },

    /// Archive cannot be opened.
    #[error("failed to open archive {:?}", path.display())]
    Open {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Archive cannot be read as gzip compressed tarball.
    #[error("failed to read archive {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Archive does not wrap its contents in the expected directory.
    #[error(
        "archive {:?} must hold a single top-level {expected:?} directory, found {found:?}",
        path.display()
    )]
    MissingWrapper {
        path: PathBuf,
        expected: String,
        found: Vec<String>,
    },
}

impl ArchiveError {
    /// Classify failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Open { .. } | Self::Read { .. } => ErrorKind::Io,
            Self::MissingWrapper { .. } => ErrorKind::Precondition,
        }
    }
}

/// Packing error types.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Source directory of static assets is missing.
    #[error("source directory {:?} does not exist", source_dir.display())]
    MissingSource { source_dir: PathBuf },

    /// Versions directory cannot be created when missing.
    #[error("failed to create versions directory {:?}", versions.display())]
    CreateVersions {
        #[source]
        source: std::io::Error,
        versions: PathBuf,
    },

    /// Archive with the same name was already packed.
    #[error("archive {:?} already exists", output.display())]
    Exists { output: PathBuf },

    /// Source directory cannot be traversed, or exclusion pattern is invalid.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Archive cannot be written.
    #[error("failed to write archive {:?}", output.display())]
    Write {
        #[source]
        source: std::io::Error,
        output: PathBuf,
    },

    /// Packed archive cannot be inspected.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl PackError {
    /// Classify failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSource { .. } => ErrorKind::NotFound,
            Self::Exists { .. } => ErrorKind::Precondition,
            Self::Archive(err) => err.kind(),
            Self::CreateVersions { .. } | Self::Walk(_) | Self::Write { .. } => ErrorKind::Io,
        }
    }
}

/// Friendly result alias :3
type Result<T, E = PackError> = std::result::Result<T, E>;
