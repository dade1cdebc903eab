// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote execution transports.
//!
//! A __transport__ is whatever lets oxiship run shell commands on a host, and
//! copy a local file over to it. Deployment logic only ever talks to hosts
//! through the [`Transport`] trait, so the way hosts are reached can be swapped
//! out without touching the release sequence itself.
//!
//! # Provided Transports
//!
//! - [`SshTransport`] reaches remote hosts through the system's `ssh` and
//!   `scp` binaries. Authentication is left entirely to SSH, i.e., agents,
//!   identity files, and known hosts are configured the usual way. Batch mode
//!   is always forced so that a missing credential fails instead of blocking
//!   on a password prompt.
//! - [`LocalTransport`] treats the local machine as the host. Commands run
//!   through `sh`, and files are copied through the file system.

use crate::{
    config::{Host, SshSettings},
    ErrorKind,
};

use std::{
    ffi::{OsStr, OsString},
    fs::copy,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Exit status `ssh` reserves for its own errors, e.g., connection failures.
const SSH_FAILURE: i32 = 255;

/// Run commands on, and copy files to, a host.
pub trait Transport {
    /// Run shell command on host.
    ///
    /// Returns standard output of the command with trailing newlines chomped.
    fn run(&self, host: &Host, command: &str) -> Result<String>;

    /// Copy local file to remote path on host.
    fn put(&self, host: &Host, local: &Path, remote: &str) -> Result<()>;
}

impl<T> Transport for Box<T>
where
    T: Transport + ?Sized,
{
    fn run(&self, host: &Host, command: &str) -> Result<String> {
        (**self).run(host, command)
    }

    fn put(&self, host: &Host, local: &Path, remote: &str) -> Result<()> {
        (**self).put(host, local, remote)
    }
}

/// Transport through the system's `ssh` and `scp` binaries.
#[derive(Debug, Default, Clone)]
pub struct SshTransport {
    options: Vec<String>,
}

impl SshTransport {
    /// Construct new SSH transport.
    pub fn new(settings: &SshSettings) -> Self {
        Self {
            options: settings.options.clone(),
        }
    }

    /// Expand arguments for `ssh` to run command on host.
    pub fn ssh_args(&self, host: &Host, command: &str) -> Vec<OsString> {
        let mut args = self.common_args(host, "-p");
        args.push(host.destination().into());
        args.push(command.into());
        args
    }

    /// Expand arguments for `scp` to copy local file to host.
    pub fn scp_args(&self, host: &Host, local: &Path, remote: &str) -> Vec<OsString> {
        let mut args = self.common_args(host, "-P");
        args.push(local.as_os_str().to_owned());
        args.push(format!("{}:{remote}", host.destination()).into());
        args
    }

    // INVARIANT: ssh takes port through "-p", while scp takes it through "-P".
    fn common_args(&self, host: &Host, port_flag: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-o".into(), "BatchMode=yes".into()];
        for option in &self.options {
            args.push("-o".into());
            args.push(option.into());
        }

        if let Some(port) = host.port {
            args.push(port_flag.into());
            args.push(port.to_string().into());
        }

        if let Some(identity) = &host.identity {
            args.push("-i".into());
            args.push(identity.as_os_str().to_owned());
        }

        args
    }
}

impl Transport for SshTransport {
    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    fn run(&self, host: &Host, command: &str) -> Result<String> {
        let output = syscall("ssh", self.ssh_args(host, command))?;
        match output.status {
            Some(0) => Ok(output.stdout),
            Some(SSH_FAILURE) => Err(TransportError::Unreachable {
                host: host.to_string(),
                message: output.message,
            }),
            status => Err(TransportError::Command {
                host: host.to_string(),
                command: command.into(),
                status,
                message: output.message,
            }),
        }
    }

    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    fn put(&self, host: &Host, local: &Path, remote: &str) -> Result<()> {
        let output = syscall("scp", self.scp_args(host, local, remote))?;
        if output.status != Some(0) {
            return Err(TransportError::Transfer {
                host: host.to_string(),
                local: local.to_path_buf(),
                remote: remote.into(),
                message: output.message,
            });
        }

        Ok(())
    }
}

/// Transport that treats the local machine as the host.
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    /// Construct new local transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    fn run(&self, host: &Host, command: &str) -> Result<String> {
        let output = syscall("sh", ["-c", command])?;
        if output.status != Some(0) {
            return Err(TransportError::Command {
                host: host.to_string(),
                command: command.into(),
                status: output.status,
                message: output.message,
            });
        }

        Ok(output.stdout)
    }

    #[instrument(skip(self, host), fields(host = %host), level = "debug")]
    fn put(&self, host: &Host, local: &Path, remote: &str) -> Result<()> {
        copy(local, remote).map_err(|err| TransportError::Transfer {
            host: host.to_string(),
            local: local.to_path_buf(),
            remote: remote.into(),
            message: err.to_string(),
        })?;

        Ok(())
    }
}

/// Quote string for safe use as one shell word.
pub fn quote(word: impl AsRef<str>) -> String {
    format!("'{}'", word.as_ref().replace('\'', "'\\''"))
}

#[derive(Debug)]
struct Syscall {
    status: Option<i32>,
    stdout: String,
    message: String,
}

fn syscall(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Syscall> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_owned())
        .collect::<Vec<_>>();
    debug!("call {:?} with {args:?}", cmd.as_ref());

    let output = Command::new(cmd.as_ref())
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| TransportError::Spawn {
            source: err,
            program: cmd.as_ref().to_string_lossy().into_owned(),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    Ok(Syscall {
        status: output.status.code(),
        stdout: chomp(stdout),
        message: chomp(message),
    })
}

// INVARIANT: Chomp trailing newlines.
fn chomp(text: String) -> String {
    text.strip_suffix("\r\n")
        .or(text.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(text)
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport binary cannot be spawned.
    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Host cannot be reached.
    #[error("cannot reach {host}:\n{message}")]
    Unreachable { host: String, message: String },

    /// Command ran on host, but exited unsuccessfully.
    #[error("command {command:?} failed on {host} with status {status:?}:\n{message}")]
    Command {
        host: String,
        command: String,
        status: Option<i32>,
        message: String,
    },

    /// File cannot be copied to host.
    #[error("failed to copy {:?} to {host}:{remote}:\n{message}", local.display())]
    Transfer {
        host: String,
        local: PathBuf,
        remote: String,
        message: String,
    },
}

impl TransportError {
    /// Classify failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Command { .. } => ErrorKind::RemoteCommand,
            Self::Spawn { .. } | Self::Unreachable { .. } | Self::Transfer { .. } => {
                ErrorKind::Transport
            }
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
