//! `sshdeploy monitor`: watch the source folder, deploy on every write of the
//! monitor file, and keep an interactive shell open to the target.
//!
//! Keys (terminal in raw mode):
//!
//! | Key | Action |
//! |-----|--------|
//! | F1  | Toggle input forwarding to the remote shell |
//! | H   | Help |
//! | Q   | Quit |
//! | C   | Clear the screen |
//! | N   | Force a deployment cycle |
//! | E   | Run the pre-deployment command |
//! | S   | Run the post-deployment command |

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use tracing::{debug, info};

use crate::config::{self, FileConfig, MonitorOptions};
use crate::console;
use crate::deploy::{Deployer, is_deployment_trigger};
use crate::monitor::{ChangeEvent, FileSystemMonitor, MonitorProgress, TriggerWatcher};
use crate::remote::{ConnectionOptions, RemoteSession, SshConnection};
use crate::terminal::{ConsoleSink, Forwarding, ShellHandle, ShellSession};
use crate::{ConnectionArgs, DeployArgs, MonitorArgs};

/// What a key press asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    ToggleInput,
    /// Bytes to write to the remote shell.
    Forward(Vec<u8>),
    Help,
    Quit,
    Clear,
    Deploy,
    PreCommand,
    PostCommand,
    Unrecognized(String),
    Ignore,
}

/// Map a key press to an action, given whether input is being forwarded.
pub fn key_action(key: &KeyEvent, forwarding_input: bool) -> KeyAction {
    if key.code == KeyCode::F(1) {
        return KeyAction::ToggleInput;
    }
    if forwarding_input {
        return forwarded_bytes(key).map_or(KeyAction::Ignore, KeyAction::Forward);
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return KeyAction::Quit;
    }
    match key.code {
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'h' => KeyAction::Help,
            'q' => KeyAction::Quit,
            'c' => KeyAction::Clear,
            'n' => KeyAction::Deploy,
            'e' => KeyAction::PreCommand,
            's' => KeyAction::PostCommand,
            _ => KeyAction::Unrecognized(c.to_string()),
        },
        KeyCode::Enter => KeyAction::Ignore,
        other => KeyAction::Unrecognized(format!("{other:?}")),
    }
}

fn forwarded_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    let bytes = match key.code {
        KeyCode::Enter => b"\r\n".to_vec(),
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() => {
            vec![(c.to_ascii_lowercase() as u8) & 0x1f]
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        _ => return None,
    };
    Some(bytes)
}

/// Keeps the terminal in raw mode while alive.
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// The active change source. Dropping it stops watching.
enum Watch {
    Poll(FileSystemMonitor),
    Notify(TriggerWatcher),
}

impl Watch {
    fn stop(self) {
        match self {
            Self::Poll(mut monitor) => monitor.stop(),
            Self::Notify(watcher) => drop(watcher),
        }
    }
}

pub fn execute(
    connection_args: &ConnectionArgs,
    deploy_args: &DeployArgs,
    monitor_args: &MonitorArgs,
    file: &FileConfig,
) -> Result<i32> {
    let connection = config::resolve_connection(connection_args, file)?;
    let options = config::resolve_deploy(deploy_args, file)?;
    let monitor = config::resolve_monitor(monitor_args, &options.source, file)?;

    console::blank();
    console::line("Monitor mode starting");
    console::line("Monitor parameters follow: ");
    console::detail("Monitor File", monitor.trigger_file.display());
    console::detail(
        "Detection",
        if monitor.poll {
            format!("poll every {}s", monitor.interval_secs)
        } else {
            "file notifications".to_string()
        },
    );
    super::print_deploy_options(Some(&connection), &options);

    let mut remote = SshConnection::new(connection.clone());
    remote
        .ensure_connected()
        .with_context(|| format!("Could not connect to {}", connection.address()))?;

    let forwarding = Arc::new(Forwarding::new());
    let shell = Arc::new(open_shell(&connection, &forwarding)?);
    let deployer = Arc::new(
        Deployer::new(options, remote).with_shell(Arc::clone(&shell), Arc::clone(&forwarding)),
    );

    let watch = start_watch(&monitor, &deployer)?;
    console::line("File System Monitor is now running.");
    console::line("Writing a new monitor file will trigger a new deployment.");
    console::line("Press H for help!");

    let interaction = {
        let _raw = RawMode::enable().context("Failed to switch the terminal to raw mode")?;
        interact(&deployer, &shell, &forwarding)
    };

    console::blank();
    watch.stop();
    console::line("File System monitor was stopped.");
    deployer.with_remote(SshConnection::disconnect);
    console::line("SSH client disconnected.");
    drop(deployer);
    drop(shell);
    console::line("Application will exit now.");

    interaction.map(|()| 0)
}

fn open_shell(connection: &ConnectionOptions, forwarding: &Arc<Forwarding>) -> Result<ShellHandle> {
    let (columns, rows) = super::terminal_size();
    let channel = SshConnection::new(connection.clone())
        .open_shell(columns, rows, true)
        .with_context(|| format!("Could not open a shell on {}", connection.address()))?;
    ShellSession::spawn(channel, ConsoleSink::new(Arc::clone(forwarding)))
        .context("Failed to start shell session")
}

fn start_watch(
    monitor: &MonitorOptions,
    deployer: &Arc<Deployer<SshConnection>>,
) -> Result<Watch> {
    let trigger = monitor.trigger_file.clone();
    let source = deployer.options().source.clone();
    let deployer = Arc::clone(deployer);
    let on_change = move |event: &ChangeEvent| {
        debug!(%event, "change detected");
        if is_deployment_trigger(event, &trigger) {
            info!(path = %event.path().display(), "deployment triggered");
            deployer.deploy();
        }
    };

    if monitor.poll {
        let mut fs_monitor = FileSystemMonitor::new(source, monitor.interval_secs).with_progress(
            |progress| {
                if let MonitorProgress::Failed(message) = progress {
                    console::error(&format!("File system monitor: {message}"));
                }
            },
        );
        fs_monitor.subscribe(on_change);
        fs_monitor.start()?;
        Ok(Watch::Poll(fs_monitor))
    } else {
        Ok(Watch::Notify(TriggerWatcher::start(&source, on_change)?))
    }
}

fn interact(
    deployer: &Deployer<SshConnection>,
    shell: &ShellHandle,
    forwarding: &Forwarding,
) -> Result<()> {
    forwarding.set_input(false);

    loop {
        let Event::Key(key) = event::read().context("Failed to read keyboard input")? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key_action(&key, forwarding.input()) {
            KeyAction::ToggleInput => {
                if forwarding.toggle_input() {
                    console::success("    >> Entered console input forwarding.");
                    forwarding.set_output(true);
                } else {
                    console::notice("    >> Left console input forwarding.");
                }
            }
            KeyAction::Forward(bytes) => {
                if !shell.send(bytes) {
                    console::notice("    >> Remote shell has closed.");
                    forwarding.set_input(false);
                }
            }
            KeyAction::Quit => return Ok(()),
            KeyAction::Clear => {
                let mut out = std::io::stdout();
                crossterm::execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
                out.flush()?;
            }
            KeyAction::Deploy => {
                deployer.deploy();
            }
            KeyAction::PreCommand => {
                if let Err(e) = deployer.run_pre_command() {
                    console::error_chain("Pre-deployment command failed.", &e);
                }
            }
            KeyAction::PostCommand => deployer.run_post_command(),
            KeyAction::Help => print_help(),
            KeyAction::Unrecognized(key) => console::notice(&format!(
                "Unrecognized command '{key}' -- Press 'H' to get a list of available commands."
            )),
            KeyAction::Ignore => {}
        }
    }
}

fn print_help() {
    console::help("Console help");
    console::help("    H    Prints this screen");
    console::help("    Q    Quits this application");
    console::help("    C    Clears the screen");
    console::help("    N    Force a deployment cycle");
    console::help("    E    Run the Pre-deployment command");
    console::help("    S    Run the Post-deployment command");
    console::help("    F1   Toggle shell-interactive mode");
    console::blank();
}
