// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release deployment.
//!
//! A __release__ is one archive extracted into its own directory on one host.
//! Deploying a release means shipping the archive over, extracting it, and
//! pointing the host's __current alias__ at the new release directory.
//!
//! # Release Sequence
//!
//! Each deployment runs the following steps against a single host, in order:
//!
//! 1. __probe__: check if the release directory already exists. Release
//!    directories only ever appear complete, so an existing one is reused
//!    as is, and the sequence skips straight to the link step.
//! 2. __upload__: copy the archive to the host's upload directory.
//! 3. __prepare__: create an empty hidden staging directory next to where
//!    the release directory will live.
//! 4. __extract__: extract the uploaded archive into the staging directory.
//! 5. __cleanup__: remove the uploaded archive.
//! 6. __relocate__: rename the archive's wrapper directory to the release
//!    directory, and remove the now empty staging directory.
//! 7. __link__: create a fresh symlink to the release directory next to the
//!    current alias.
//! 8. __activate__: rename that symlink over the current alias.
//!
//! The first failing step aborts the sequence. Leftovers in the staging and
//! upload locations get cleaned up on a best effort basis. The current alias
//! is only modified by the final rename, so it never points at a partially
//! extracted release, and a failed deployment leaves the previous release
//! live.
//!
//! # Pitfalls
//!
//! Nothing guards a host against two deployments running at the same time.
//! Both would race on the same staging directory and current alias. Hosts are
//! also deployed to independently, so one host may end up on a newer release
//! than another when a deployment fails part way through a host listing.

pub mod plan;
pub mod transport;

use crate::{
    archive::{Archive, ArchiveError},
    config::{Host, RemoteLayout},
    release::{
        plan::{list_releases, read_current, ReleasePlan},
        transport::{SshTransport, Transport, TransportError},
    },
    ErrorKind,
};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Step of the release sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Probe,
    Upload,
    Prepare,
    Extract,
    Cleanup,
    Relocate,
    Link,
    Activate,
}

impl Step {
    /// Every step in order.
    pub const ALL: [Step; 8] = [
        Step::Probe,
        Step::Upload,
        Step::Prepare,
        Step::Extract,
        Step::Cleanup,
        Step::Relocate,
        Step::Link,
        Step::Activate,
    ];

    /// Steps skipped when release directory already exists.
    const SKIPPED_ON_REUSE: u64 = 5;
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Step::Probe => "probe",
            Step::Upload => "upload",
            Step::Prepare => "prepare",
            Step::Extract => "extract",
            Step::Cleanup => "cleanup",
            Step::Relocate => "relocate",
            Step::Link => "link",
            Step::Activate => "activate",
        };

        fmt.write_str(name)
    }
}

/// Release deployed to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Host deployed to.
    pub host: String,

    /// Name of release directory.
    pub name: String,

    /// Remote path to release directory.
    pub path: String,

    /// Release directory already existed, and was reused.
    pub reused: bool,
}

/// Deploy releases to hosts through a transport.
pub struct Deployer<T = SshTransport>
where
    T: Transport,
{
    transport: T,
    layout: RemoteLayout,
    wrapper: String,
    progress: MultiProgress,
    style: ProgressStyle,
}

impl<T> Deployer<T>
where
    T: Transport,
{
    /// Construct new deployer.
    ///
    /// Progress is not displayed until [`Deployer::with_progress`] is used.
    pub fn new(transport: T, layout: RemoteLayout, wrapper: impl Into<String>) -> Self {
        Self {
            transport,
            layout,
            wrapper: wrapper.into(),
            progress: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            style: ProgressStyle::default_bar(),
        }
    }

    /// Display one progress bar per deployment.
    pub fn with_progress(mut self, progress: MultiProgress, style: ProgressStyle) -> Self {
        self.progress = progress;
        self.style = style;
        self
    }

    /// Transport used to reach hosts.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Remote release layout.
    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Deploy archive to host.
    ///
    /// Runs the full release sequence against one host. See the
    /// [module-level documentation](self) for the steps involved.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::ArchiveNotFound`] if archive does not exist.
    ///   No remote operation is attempted.
    /// - Return [`DeployError::Archive`] if archive cannot be read, or does
    ///   not wrap its contents in the expected directory. No remote operation
    ///   is attempted.
    /// - Return [`DeployError::Step`] if any step of the release sequence
    ///   fails.
    #[instrument(skip(self, host, archive), fields(host = %host), level = "debug")]
    pub fn deploy(&self, host: &Host, archive: impl AsRef<Path>) -> Result<Release> {
        let archive = Archive::open(archive.as_ref()).map_err(|err| match err {
            ArchiveError::NotFound { path } => DeployError::ArchiveNotFound { path },
            err => DeployError::Archive(err),
        })?;
        archive.check_wrapper(&self.wrapper)?;

        let plan = ReleasePlan::new(&self.layout, self.wrapper.as_str(), archive.path());
        let bar = self
            .progress
            .add(ProgressBar::new(Step::ALL.len() as u64));
        bar.set_style(self.style.clone());
        bar.set_prefix(host.to_string());

        match self.execute(host, &archive, &plan, &bar) {
            Ok(reused) => {
                bar.finish_with_message(plan.folder_name.clone());
                info!("New version deployed to {host}: {}", plan.release);
                Ok(Release {
                    host: host.to_string(),
                    name: plan.folder_name,
                    path: plan.release,
                    reused,
                })
            }
            Err(error) => {
                bar.abandon_with_message(format!("failed at {}", error.step_name()));
                self.abandon(host, &plan);
                Err(error)
            }
        }
    }

    fn execute(
        &self,
        host: &Host,
        archive: &Archive,
        plan: &ReleasePlan,
        bar: &ProgressBar,
    ) -> Result<bool> {
        let probe = self.step(host, Step::Probe, bar, || {
            self.transport.run(host, &plan.probe())
        })?;
        let reused = probe.trim() == "present";

        if reused {
            info!(
                "release {} already present on {host}, reusing it",
                plan.folder_name
            );
            bar.inc(Step::SKIPPED_ON_REUSE);
        } else {
            self.step(host, Step::Upload, bar, || {
                self.transport.put(host, archive.path(), &plan.upload)
            })?;
            self.step(host, Step::Prepare, bar, || {
                self.transport.run(host, &plan.prepare())
            })?;
            self.step(host, Step::Extract, bar, || {
                self.transport.run(host, &plan.extract())
            })?;
            self.step(host, Step::Cleanup, bar, || {
                self.transport.run(host, &plan.cleanup())
            })?;
            self.step(host, Step::Relocate, bar, || {
                self.transport.run(host, &plan.relocate())
            })?;
        }

        self.step(host, Step::Link, bar, || {
            self.transport.run(host, &plan.link())
        })?;

        // INVARIANT: This rename is the only mutation of the current alias.
        self.step(host, Step::Activate, bar, || {
            self.transport.run(host, &plan.activate())
        })?;

        Ok(reused)
    }

    fn step<O>(
        &self,
        host: &Host,
        step: Step,
        bar: &ProgressBar,
        call: impl FnOnce() -> Result<O, TransportError>,
    ) -> Result<O> {
        bar.set_message(step.to_string());
        debug!("run step {step} on {host}");
        let output = call().map_err(|source| DeployError::Step {
            host: host.to_string(),
            step,
            source,
        })?;
        bar.inc(1);

        Ok(output)
    }

    fn abandon(&self, host: &Host, plan: &ReleasePlan) {
        if let Err(error) = self.transport.run(host, &plan.abandon()) {
            warn!("failed to clean up after failed deployment on {host}: {error}");
        }
    }

    /// Determine which release the current alias of host points to.
    ///
    /// Returns [`None`] if host has no current alias yet.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Query`] if host cannot be queried.
    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    pub fn current(&self, host: &Host) -> Result<Option<String>> {
        let output = self
            .transport
            .run(host, &read_current(&self.layout))
            .map_err(|source| DeployError::Query {
                host: host.to_string(),
                source,
            })?;
        let target = output.trim();

        Ok((!target.is_empty()).then(|| target.to_string()))
    }

    /// List release directories present on host.
    ///
    /// Staging directories are left out. Names are sorted, thus oldest first.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Query`] if host cannot be queried.
    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    pub fn releases(&self, host: &Host) -> Result<Vec<String>> {
        let output = self
            .transport
            .run(host, &list_releases(&self.layout))
            .map_err(|source| DeployError::Query {
                host: host.to_string(),
                source,
            })?;

        let mut releases = output
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.starts_with('.'))
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        releases.sort();

        Ok(releases)
    }
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Archive to deploy does not exist.
    #[error("archive {:?} does not exist", path.display())]
    ArchiveNotFound { path: PathBuf },

    /// Archive cannot be read, or has unexpected layout.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Step of release sequence failed.
    #[error("deployment to {host} failed at {step} step")]
    Step {
        host: String,
        step: Step,
        #[source]
        source: TransportError,
    },

    /// Host cannot be queried for release information.
    #[error("failed to query releases of {host}")]
    Query {
        host: String,
        #[source]
        source: TransportError,
    },
}

impl DeployError {
    /// Classify failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArchiveNotFound { .. } => ErrorKind::NotFound,
            Self::Archive(err) => err.kind(),
            Self::Step { source, .. } | Self::Query { source, .. } => source.kind(),
        }
    }

    /// Step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    fn step_name(&self) -> String {
        self.step()
            .map(|step| step.to_string())
            .unwrap_or_else(|| "preflight".into())
    }
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archive::Packager, config::PackageSettings};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, fs::create_dir_all};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Run(String),
        Put(String),
    }

    /// Records calls, and fails the first command containing a marker.
    #[derive(Debug, Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
        probe_output: String,
        fail_on: Option<&'static str>,
    }

    impl Transport for Recorder {
        fn run(&self, host: &Host, command: &str) -> transport::Result<String> {
            self.calls.borrow_mut().push(Call::Run(command.into()));
            if self.fail_on.is_some_and(|marker| command.starts_with(marker)) {
                return Err(TransportError::Command {
                    host: host.to_string(),
                    command: command.into(),
                    status: Some(2),
                    message: "stderr: boom".into(),
                });
            }

            if command.starts_with("if [ -d") {
                return Ok(self.probe_output.clone());
            }

            Ok(String::new())
        }

        fn put(&self, _host: &Host, _local: &Path, remote: &str) -> transport::Result<()> {
            self.calls.borrow_mut().push(Call::Put(remote.into()));
            Ok(())
        }
    }

    fn packed_archive(root: &Path) -> anyhow::Result<Archive> {
        let source = root.join("web_static");
        create_dir_all(&source)?;
        std::fs::write(source.join("index.html"), "hello")?;
        let stamp = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        Ok(Packager::new(&PackageSettings {
            source,
            versions: root.join("versions"),
            prefix: None,
            exclude: None,
        })
        .pack_at(stamp)?)
    }

    fn plan_for(archive: &Archive) -> ReleasePlan {
        ReleasePlan::new(&RemoteLayout::default(), "web_static", archive.path())
    }

    #[test]
    fn deploy_runs_full_sequence() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = packed_archive(root.path())?;
        let plan = plan_for(&archive);
        let deployer = Deployer::new(Recorder::default(), RemoteLayout::default(), "web_static");

        let release = deployer.deploy(&Host::new("34.73.0.174"), archive.path())?;

        assert_eq!(
            release,
            Release {
                host: "34.73.0.174".into(),
                name: "web_static_20250101120000".into(),
                path: "/data/web_static/releases/web_static_20250101120000".into(),
                reused: false,
            }
        );
        assert_eq!(
            *deployer.transport().calls.borrow(),
            vec![
                Call::Run(plan.probe()),
                Call::Put("/tmp/web_static_20250101120000.tgz".into()),
                Call::Run(plan.prepare()),
                Call::Run(plan.extract()),
                Call::Run(plan.cleanup()),
                Call::Run(plan.relocate()),
                Call::Run(plan.link()),
                Call::Run(plan.activate()),
            ]
        );

        Ok(())
    }

    #[test]
    fn deploy_reuses_existing_release() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = packed_archive(root.path())?;
        let plan = plan_for(&archive);
        let recorder = Recorder {
            probe_output: "present".into(),
            ..Default::default()
        };
        let deployer = Deployer::new(recorder, RemoteLayout::default(), "web_static");

        let release = deployer.deploy(&Host::new("34.73.0.174"), archive.path())?;

        assert!(release.reused);
        assert_eq!(
            *deployer.transport().calls.borrow(),
            vec![
                Call::Run(plan.probe()),
                Call::Run(plan.link()),
                Call::Run(plan.activate()),
            ]
        );

        Ok(())
    }

    #[test]
    fn deploy_stops_at_failed_step() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = packed_archive(root.path())?;
        let plan = plan_for(&archive);
        let recorder = Recorder {
            fail_on: Some("tar -xzf"),
            ..Default::default()
        };
        let deployer = Deployer::new(recorder, RemoteLayout::default(), "web_static");

        let result = deployer.deploy(&Host::new("34.73.0.174"), archive.path());

        let error = result.unwrap_err();
        assert_eq!(error.step(), Some(Step::Extract));
        assert_eq!(error.kind(), ErrorKind::RemoteCommand);
        assert_eq!(
            *deployer.transport().calls.borrow(),
            vec![
                Call::Run(plan.probe()),
                Call::Put("/tmp/web_static_20250101120000.tgz".into()),
                Call::Run(plan.prepare()),
                Call::Run(plan.extract()),
                Call::Run(plan.abandon()),
            ]
        );

        Ok(())
    }

    #[test]
    fn deploy_missing_archive_never_reaches_host() {
        let deployer = Deployer::new(Recorder::default(), RemoteLayout::default(), "web_static");

        let result = deployer.deploy(
            &Host::new("34.73.0.174"),
            "versions/web_static_20000101000000.tgz",
        );

        assert!(matches!(result, Err(DeployError::ArchiveNotFound { .. })));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(deployer.transport().calls.borrow().is_empty());
    }

    #[test]
    fn deploy_rejects_archive_without_wrapper() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let archive = packed_archive(root.path())?;
        let deployer = Deployer::new(Recorder::default(), RemoteLayout::default(), "public");

        let result = deployer.deploy(&Host::new("34.73.0.174"), archive.path());

        assert!(matches!(
            result,
            Err(DeployError::Archive(ArchiveError::MissingWrapper { .. }))
        ));
        assert!(deployer.transport().calls.borrow().is_empty());

        Ok(())
    }

    #[test]
    fn releases_skip_staging_directories() -> anyhow::Result<()> {
        struct Listing;

        impl Transport for Listing {
            fn run(&self, _host: &Host, _command: &str) -> transport::Result<String> {
                Ok("web_static_2\n.web_static_3.staging\nweb_static_1\n".into())
            }

            fn put(&self, _host: &Host, _local: &Path, _remote: &str) -> transport::Result<()> {
                Ok(())
            }
        }

        let deployer = Deployer::new(Listing, RemoteLayout::default(), "web_static");

        assert_eq!(
            deployer.releases(&Host::new("34.73.0.174"))?,
            vec!["web_static_1", "web_static_2"]
        );

        Ok(())
    }
}
