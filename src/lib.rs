// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Static site release packaging and deployment.
//!
//! Oxiship packs a directory of static assets into a timestamped archive, and
//! ships that archive to a listing of hosts. Each host receives its own
//! __release directory__ per archive, and a __current alias__ symlink that
//! selects the live release.
//!
//! # Release Layout
//!
//! ```text
//! /data/web_static/
//! ├── current -> releases/web_static_20250101120000
//! └── releases/
//!     ├── web_static_20241224093000/
//!     └── web_static_20250101120000/
//! ```
//!
//! Release directories and the current alias only ever change by rename. Thus,
//! the current alias never points at a partially extracted release, and a
//! failed deployment leaves the previous release live.
//!
//! # See Also
//!
//! 1. [`archive`]
//! 2. [`release`]
//! 3. [`session`]

pub mod archive;
pub mod config;
pub mod path;
pub mod release;
pub mod session;

/// Broad classification of failures.
///
/// Lets callers branch on the cause of a failed pack or deployment without
/// matching on every error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file system I/O failed.
    Io,

    /// Host could not be reached, or a file could not be transferred to it.
    Transport,

    /// Command ran on host but failed.
    RemoteCommand,

    /// Required input does not exist.
    NotFound,

    /// Input exists but violates an expected layout.
    Precondition,
}
