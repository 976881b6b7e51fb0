//! `sshdeploy shell`: a line-based remote shell.
//!
//! Each line read from stdin is sent with CR LF. After `exit` the verb waits
//! briefly for the remote `logout` and quits once it arrives.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::ConnectionArgs;
use crate::config::{self, FileConfig};
use crate::remote::SshConnection;
use crate::terminal::{ConsoleSink, Forwarding, ShellHandle, ShellSession};

const EXIT_COMMAND: &str = "exit";
const LOGOUT_MARKER: &str = "logout";
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn execute(args: &ConnectionArgs, file: &FileConfig) -> Result<i32> {
    let connection = config::resolve_connection(args, file)?;
    let address = connection.address();
    let (columns, rows) = super::terminal_size();

    let channel = SshConnection::new(connection)
        .open_shell(columns, rows, false)
        .with_context(|| format!("Could not open a shell on {address}"))?;

    let forwarding = Arc::new(Forwarding::new());
    forwarding.set_output(true);
    let mut shell = ShellSession::spawn(channel, ConsoleSink::new(forwarding))
        .context("Failed to start shell session")?;

    let stdin = std::io::stdin();
    forward_lines(stdin.lock(), &shell)?;

    shell.stop();
    Ok(0)
}

/// Send every line of `input` to the shell until it logs out, closes, or
/// the input ends.
pub fn forward_lines<I: BufRead>(input: I, shell: &ShellHandle) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim() == EXIT_COMMAND {
            let seen = shell.send_line_and_expect(&line, LOGOUT_MARKER, LOGOUT_TIMEOUT);
            if logged_out(seen) || shell.is_closed() {
                return Ok(());
            }
            continue;
        }
        if !shell.send_line(&line) {
            debug!("shell closed by remote");
            return Ok(());
        }
    }

    debug!("stdin closed; logging out");
    shell.send_line_and_expect(EXIT_COMMAND, LOGOUT_MARKER, LOGOUT_TIMEOUT);
    Ok(())
}

fn logged_out(seen: Option<String>) -> bool {
    seen.is_some_and(|text| text.trim_end().ends_with(LOGOUT_MARKER))
}
