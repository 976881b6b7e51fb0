//! The verbs behind each subcommand.

pub mod monitor;
pub mod push;
pub mod run;
pub mod shell;

use crate::console;
use crate::deploy::DeployOptions;
use crate::remote::ConnectionOptions;

/// Columns and rows of the local terminal, with a fallback when stdout is
/// not a terminal.
pub(crate) fn terminal_size() -> (u32, u32) {
    crossterm::terminal::size()
        .map(|(cols, rows)| (u32::from(cols), u32::from(rows)))
        .unwrap_or((80, 24))
}

/// Print the parameter block shown before deploying.
pub(crate) fn print_deploy_options(connection: Option<&ConnectionOptions>, options: &DeployOptions) {
    console::detail("Source Path", options.source.display());
    console::detail("Excluded Files", options.excludes.join("|"));
    match connection {
        Some(conn) => {
            console::detail("Target Address", conn.address());
            console::detail("Username", &conn.username);
        }
        None => console::detail("Target Address", "(dry run)"),
    }
    console::detail("Target Path", &options.target);
    console::detail("Clean Target", if options.clean_target { "YES" } else { "NO" });
    console::detail("Allow Execute", if options.allow_execute { "YES" } else { "NO" });
    console::detail("Pre Deployment", options.pre_command.as_deref().unwrap_or(""));
    console::detail("Post Deployment", options.post_command.as_deref().unwrap_or(""));
}
