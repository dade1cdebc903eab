// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shipping sessions.
//!
//! A __session__ covers one run of packing and deploying. It packs the static
//! assets at most once no matter how often packing is requested, then deploys
//! the resulting archive to each host in turn.
//!
//! Hosts are always handed to a session explicitly. Each host gets deployed to
//! independently and sequentially, so one failing host never stops the others
//! from receiving the release. Whatever happened on each host is collected
//! into a [`Rollout`] report.

use crate::{
    archive::{Archive, PackError, Packager},
    config::Host,
    release::{transport::Transport, DeployError, Deployer, Release},
};

use std::path::Path;
use tracing::{debug, error, info, instrument};

/// Outcome of deploying to one host.
#[derive(Debug)]
pub struct HostOutcome {
    /// Host deployed to.
    pub host: Host,

    /// Deployed release, or reason for failure.
    pub result: Result<Release, DeployError>,
}

/// Report of deploying one archive to a listing of hosts.
#[derive(Debug, Default)]
pub struct Rollout {
    outcomes: Vec<HostOutcome>,
}

impl Rollout {
    /// Outcomes in host order.
    pub fn outcomes(&self) -> &[HostOutcome] {
        self.outcomes.as_slice()
    }

    /// Check if every host received the release.
    ///
    /// An empty rollout counts as a success.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// Outcomes of hosts that failed.
    pub fn failures(&self) -> impl Iterator<Item = &HostOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }
}

/// One packing and deployment run.
pub struct Session<T>
where
    T: Transport,
{
    packager: Packager,
    deployer: Deployer<T>,
    archive: Option<Archive>,
}

impl<T> Session<T>
where
    T: Transport,
{
    /// Construct new session.
    pub fn new(packager: Packager, deployer: Deployer<T>) -> Self {
        Self {
            packager,
            deployer,
            archive: None,
        }
    }

    /// Deployer used by session.
    pub fn deployer(&self) -> &Deployer<T> {
        &self.deployer
    }

    /// Archive packed by session, if any.
    pub fn archive(&self) -> Option<&Archive> {
        self.archive.as_ref()
    }

    /// Pack static assets once.
    ///
    /// The first call packs a new archive. Every later call hands back that
    /// same archive without packing again.
    ///
    /// # Errors
    ///
    /// - Return [`PackError`] if packing fails. A failed pack is not
    ///   remembered, so calling again retries.
    pub fn pack(&mut self) -> Result<&Archive, PackError> {
        let archive = match self.archive.take() {
            Some(archive) => {
                debug!(
                    "already packed {:?} this session",
                    archive.path().display()
                );
                archive
            }
            None => self.packager.pack()?,
        };

        Ok(self.archive.insert(archive))
    }

    /// Deploy archive to each host in turn.
    ///
    /// Every host is attempted, even after a failure on a previous host.
    #[instrument(skip(self, archive, hosts), level = "debug")]
    pub fn deploy(&self, archive: impl AsRef<Path>, hosts: &[Host]) -> Rollout {
        let mut rollout = Rollout::default();
        for host in hosts {
            let result = self.deployer.deploy(host, archive.as_ref());
            if let Err(err) = &result {
                error!("deployment to {host} failed: {err}");
            }

            rollout.outcomes.push(HostOutcome {
                host: host.clone(),
                result,
            });
        }

        info!(
            "deployed to {} of {} hosts",
            rollout.outcomes.len() - rollout.failures().count(),
            rollout.outcomes.len()
        );

        rollout
    }

    /// Pack once, then deploy the archive to each host in turn.
    ///
    /// # Errors
    ///
    /// - Return [`PackError`] if packing fails. No host is deployed to.
    pub fn ship(&mut self, hosts: &[Host]) -> Result<Rollout, PackError> {
        let archive = self.pack()?.path().to_path_buf();
        Ok(self.deploy(archive, hosts))
    }
}
