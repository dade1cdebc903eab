// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxiship::{
    archive::Packager,
    config::{Host, ShipConfig, TransportKind},
    path::{default_config_path, CONFIG_FILE_NAME},
    release::{
        transport::{LocalTransport, SshTransport, Transport},
        Deployer,
    },
    session::{Rollout, Session},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressStyle};
use inquire::Confirm;
use std::{
    error::Error,
    fs::{read_to_string, write},
    io::{stdin, IsTerminal},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxiship [options] <oxiship-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to ship configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(self.config, opts),
            Command::Pack => run_pack(self.config),
            Command::Deploy(opts) => run_deploy(self.config, opts),
            Command::Ship(opts) => run_ship(self.config, opts),
            Command::Status(opts) => run_status(self.config, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write new ship configuration file.
    #[command(override_usage = "oxiship init [options]")]
    Init(InitOptions),

    /// Pack static assets into new archive.
    #[command(override_usage = "oxiship pack [options]")]
    Pack,

    /// Deploy existing archive to hosts.
    #[command(override_usage = "oxiship deploy [options] <archive>")]
    Deploy(DeployOptions),

    /// Pack static assets, and deploy the new archive to hosts.
    #[command(override_usage = "oxiship ship [options]")]
    Ship(ShipOptions),

    /// Show live release and available releases of hosts.
    #[command(override_usage = "oxiship status [options]")]
    Status(StatusOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    /// Path to archive to deploy.
    #[arg(required = true, value_name = "archive")]
    pub archive: PathBuf,

    /// Only deploy to given host address, can be repeated.
    #[arg(long = "host", value_name = "address")]
    pub hosts: Vec<String>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShipOptions {
    /// Only deploy to given host address, can be repeated.
    #[arg(long = "host", value_name = "address")]
    pub hosts: Vec<String>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Only show given host address, can be repeated.
    #[arg(long = "host", value_name = "address")]
    pub hosts: Vec<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_init(config: Option<PathBuf>, opts: InitOptions) -> Result<()> {
    let path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    if path.exists() && !opts.force {
        bail!(
            "configuration {:?} already exists, use --force to overwrite it",
            path.display()
        );
    }

    let definition = ShipConfig {
        hosts: vec![Host::new("<put host address here>")],
        ..Default::default()
    };
    write(&path, definition.to_string())
        .with_context(|| format!("failed to write configuration {:?}", path.display()))?;
    info!("wrote configuration {:?}", path.display());

    Ok(())
}

fn run_pack(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let mut session = open_session(&config)?;
    let archive = session.pack()?;
    println!("{}", archive.path().display());

    Ok(())
}

fn run_deploy(config: Option<PathBuf>, opts: DeployOptions) -> Result<()> {
    let config = load_config(config)?;
    let hosts = select_hosts(&config, &opts.hosts)?;
    if !confirm(&opts.archive.display().to_string(), &hosts, opts.yes)? {
        warn!("deployment cancelled");
        return Ok(());
    }

    let session = open_session(&config)?;
    report(&session.deploy(&opts.archive, &hosts))
}

fn run_ship(config: Option<PathBuf>, opts: ShipOptions) -> Result<()> {
    let config = load_config(config)?;
    let hosts = select_hosts(&config, &opts.hosts)?;
    let mut session = open_session(&config)?;
    let archive = session.pack()?.path().to_path_buf();
    if !confirm(&archive.display().to_string(), &hosts, opts.yes)? {
        warn!("deployment cancelled, {:?} stays packed", archive.display());
        return Ok(());
    }

    report(&session.deploy(&archive, &hosts))
}

fn run_status(config: Option<PathBuf>, opts: StatusOptions) -> Result<()> {
    let config = load_config(config)?;
    let hosts = select_hosts(&config, &opts.hosts)?;
    let session = open_session(&config)?;
    let deployer = session.deployer();

    let mut failed = 0;
    for host in &hosts {
        let status = deployer
            .current(host)
            .and_then(|current| Ok((current, deployer.releases(host)?)));
        match status {
            Ok((current, releases)) => {
                let current = current.unwrap_or_else(|| "<none>".into());
                info!("{host}: current -> {current}");
                for release in releases {
                    info!("{host}:   {release}");
                }
            }
            Err(err) => {
                failed += 1;
                error!("{host}: {}", error_chain(&err));
            }
        }
    }

    if failed > 0 {
        bail!("failed to query {failed} of {} hosts", hosts.len());
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<ShipConfig> {
    let path = match path {
        Some(path) => path,
        None => default_config_path(std::env::current_dir()?)?,
    };

    read_to_string(&path)
        .with_context(|| format!("failed to read configuration {:?}", path.display()))?
        .parse::<ShipConfig>()
        .with_context(|| format!("invalid configuration {:?}", path.display()))
}

fn open_session(config: &ShipConfig) -> Result<Session<Box<dyn Transport>>> {
    let transport: Box<dyn Transport> = match config.remote.transport {
        TransportKind::Ssh => Box::new(SshTransport::new(&config.ssh)),
        TransportKind::Local => Box::new(LocalTransport::new()),
    };

    let style = ProgressStyle::with_template(
        "{prefix:<24.bold}  [{bar:30.yellow/blue}]  {pos}/{len}  {msg}",
    )?
    .progress_chars("-Cco.");
    let deployer = Deployer::new(
        transport,
        config.remote.clone(),
        config.package.wrapper_name(),
    )
    .with_progress(MultiProgress::new(), style);

    Ok(Session::new(Packager::new(&config.package), deployer))
}

fn select_hosts(config: &ShipConfig, addresses: &[String]) -> Result<Vec<Host>> {
    let hosts = config
        .select_hosts(addresses)
        .map_err(|unknown| anyhow!("unknown hosts: {}", unknown.join(", ")))?;
    if hosts.is_empty() {
        bail!("no hosts configured");
    }

    Ok(hosts)
}

fn confirm(archive: &str, hosts: &[Host], yes: bool) -> Result<bool> {
    if yes || !stdin().is_terminal() {
        return Ok(true);
    }

    let hosts = hosts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Confirm::new(&format!("Deploy {archive} to {hosts}?"))
        .with_default(false)
        .prompt()?)
}

fn report(rollout: &Rollout) -> Result<()> {
    for outcome in rollout.outcomes() {
        match &outcome.result {
            Ok(release) if release.reused => {
                info!("{}: {} (reused)", outcome.host, release.path)
            }
            Ok(release) => info!("{}: {}", outcome.host, release.path),
            Err(err) => error!("{}: {}", outcome.host, error_chain(err)),
        }
    }

    let failed = rollout.failures().count();
    if failed > 0 {
        bail!(
            "deployment failed on {failed} of {} hosts",
            rollout.outcomes().len()
        );
    }

    info!("New version deployed!");

    Ok(())
}

fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(format!("\n  caused by: {cause}").as_str());
        source = cause.source();
    }

    message
}
