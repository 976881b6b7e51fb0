//! `sshdeploy push`: optionally build, then run one deployment cycle.

use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::config::{self, FileConfig};
use crate::console;
use crate::deploy::{DeployOutcome, Deployer};
use crate::remote::{MemoryRemote, RemoteSession, SshConnection};
use crate::{ConnectionArgs, DeployArgs};

pub struct PushRequest<'a> {
    pub connection: &'a ConnectionArgs,
    pub deploy: &'a DeployArgs,
    pub build: Option<&'a str>,
    pub dry_run: bool,
    pub file: &'a FileConfig,
}

pub fn execute(request: &PushRequest<'_>) -> Result<i32> {
    let connection = if request.dry_run {
        None
    } else {
        Some(config::resolve_connection(request.connection, request.file)?)
    };

    if let Some(build) = request.build {
        run_build(build)?;
    }

    // The build may be what creates the source folder, so it is checked after.
    let options = config::resolve_deploy(request.deploy, request.file)?;

    console::blank();
    console::line("Deploying....");
    super::print_deploy_options(connection.as_ref(), &options);

    let outcome = match connection {
        Some(connection) => {
            let mut remote = SshConnection::new(connection);
            remote
                .ensure_connected()
                .with_context(|| format!("Could not connect to {}", remote.describe()))?;
            let deployer = Deployer::new(options, remote);
            let outcome = deployer.deploy();
            deployer.into_remote().disconnect();
            outcome
        }
        None => {
            let deployer = Deployer::new(options, MemoryRemote::new().verbose());
            let outcome = deployer.deploy();
            let remote = deployer.into_remote();
            console::line(&format!(
                "Dry run: {} uploads, {} directories created, {} commands.",
                remote.uploads().len(),
                remote.created_dirs().len(),
                remote.commands().len()
            ));
            outcome
        }
    };

    Ok(match outcome {
        DeployOutcome::Completed { .. } => 0,
        DeployOutcome::Failed { .. } | DeployOutcome::Skipped => 1,
    })
}

/// Run the local build command, failing on a non-zero exit.
pub fn run_build(command_line: &str) -> Result<()> {
    let argv = shell_words::split(command_line)
        .with_context(|| format!("Invalid build command: {command_line}"))?;
    let Some((program, args)) = argv.split_first() else {
        bail!("Build command is empty");
    };

    console::step(&format!("Building: {command_line}"));
    info!(program = %program, ?args, "running build command");
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to start build command '{program}'"))?;
    if !status.success() {
        bail!("Build command failed ({status})");
    }
    Ok(())
}
