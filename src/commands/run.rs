//! `sshdeploy run`: execute one remote command and mirror its exit status.

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::{self, FileConfig};
use crate::console;
use crate::remote::{CommandOutput, RemoteCommand, RemoteSession, SshConnection};
use crate::ConnectionArgs;

pub fn execute(args: &ConnectionArgs, command: &str, file: &FileConfig) -> Result<i32> {
    let connection = config::resolve_connection(args, file)?;
    let mut remote = SshConnection::new(connection);
    remote
        .ensure_connected()
        .with_context(|| format!("Could not connect to {}", remote.describe()))?;

    let output = run_command(&mut remote, command)?;
    remote.disconnect();
    Ok(output.exit_status)
}

/// Execute `command`, echoing it and its result.
pub fn run_command<R: RemoteCommand + ?Sized>(remote: &mut R, command: &str) -> Result<CommandOutput> {
    console::line("SSH TX:");
    console::success(command);

    let output = remote
        .execute(command)
        .with_context(|| format!("Failed to run '{command}'"))?;
    debug!(command, status = output.exit_status, "remote command finished");

    console::line("SSH RX:");
    if !output.success() {
        console::line(&format!("Error {}", output.exit_status));
        console::line(output.stderr.trim_end());
    }
    if !output.stdout.trim().is_empty() {
        console::transcript(output.stdout.trim_end());
    }
    Ok(output)
}
