//! The deployment cycle.
//!
//! A [`Deployer`] owns the remote session and runs at most one cycle at a
//! time. Triggers arriving while a cycle runs are dropped, not queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::plan::{files_to_deploy, remote_target_for};
use crate::console;
use crate::remote::{RemoteError, RemoteSession, delete_tree, ensure_directory, remote_parent};
use crate::terminal::{Forwarding, ShellHandle};

/// What a cycle deploys and the commands around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Local folder whose contents are mirrored.
    pub source: PathBuf,
    /// Absolute remote folder receiving the files.
    pub target: String,
    /// Run on the remote before anything is transferred.
    pub pre_command: Option<String>,
    /// Run on the remote after a successful transfer.
    pub post_command: Option<String>,
    /// Empty the target folder before uploading.
    pub clean_target: bool,
    /// File suffixes never uploaded.
    pub excludes: Vec<String>,
    /// `chmod -R u+x` the target after uploading.
    pub allow_execute: bool,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to upload '{}' to '{remote}'", local.display())]
    Upload {
        local: PathBuf,
        remote: String,
        #[source]
        source: RemoteError,
    },

    #[error("File '{}' is not inside the source folder", .0.display())]
    OutsideSource(PathBuf),
}

/// Bookkeeping for one cycle.
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub sequence_number: u64,
    pub started_at: DateTime<Local>,
    pub locked: bool,
}

/// Files and bytes moved by a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
    pub delete_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    Completed {
        sequence_number: u64,
        elapsed: Duration,
        summary: TransferSummary,
    },
    Failed {
        sequence_number: u64,
        elapsed: Duration,
        error: String,
    },
    /// Another cycle was already running.
    Skipped,
}

impl DeployOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            Self::Completed {
                sequence_number, ..
            }
            | Self::Failed {
                sequence_number, ..
            } => Some(*sequence_number),
            Self::Skipped => None,
        }
    }
}

/// Interactive shell the post-command is written to in monitor mode.
struct ShellAttachment {
    handle: Arc<ShellHandle>,
    forwarding: Arc<Forwarding>,
}

/// Runs deployment cycles against a remote session.
pub struct Deployer<R: RemoteSession> {
    options: DeployOptions,
    remote: Mutex<R>,
    deploying: AtomicBool,
    deployment_number: AtomicU64,
    shell: Option<ShellAttachment>,
}

/// Releases the single-flight flag and advances the counter on every exit
/// path of a cycle.
struct RunGuard<'a> {
    deploying: &'a AtomicBool,
    deployment_number: &'a AtomicU64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.deploying.store(false, Ordering::SeqCst);
        self.deployment_number.fetch_add(1, Ordering::SeqCst);
    }
}

impl<R: RemoteSession> Deployer<R> {
    pub fn new(options: DeployOptions, remote: R) -> Self {
        Self {
            options,
            remote: Mutex::new(remote),
            deploying: AtomicBool::new(false),
            deployment_number: AtomicU64::new(1),
            shell: None,
        }
    }

    /// Route the post-command through an interactive shell.
    pub fn with_shell(mut self, handle: Arc<ShellHandle>, forwarding: Arc<Forwarding>) -> Self {
        self.shell = Some(ShellAttachment { handle, forwarding });
        self
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn is_deploying(&self) -> bool {
        self.deploying.load(Ordering::SeqCst)
    }

    /// Sequence number the next cycle will get.
    pub fn next_deployment_number(&self) -> u64 {
        self.deployment_number.load(Ordering::SeqCst)
    }

    /// Access the remote session (for inspection or disconnecting).
    pub fn with_remote<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        f(&mut self.remote.lock())
    }

    pub fn into_remote(self) -> R {
        self.remote.into_inner()
    }

    /// Run one deployment cycle.
    ///
    /// Never fails: errors are reported on the console and folded into
    /// [`DeployOutcome::Failed`].
    pub fn deploy(&self) -> DeployOutcome {
        console::blank();

        if self
            .deploying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            console::warning("WARNING: Deployment already in progress. Deployment will not occur.");
            debug!("deployment trigger ignored; cycle in progress");
            return DeployOutcome::Skipped;
        }

        let run = DeploymentRun {
            sequence_number: self.deployment_number.load(Ordering::SeqCst),
            started_at: Local::now(),
            locked: true,
        };
        let stopwatch = Instant::now();

        // The post-command is part of the cycle and runs under the guard.
        let (result, elapsed) = {
            let _guard = RunGuard {
                deploying: &self.deploying,
                deployment_number: &self.deployment_number,
            };
            if let Some(shell) = &self.shell {
                shell.forwarding.set_output(false);
            }
            let result = self.run_cycle(&run);
            if result.is_ok() {
                self.run_post_command();
            }
            (result, stopwatch.elapsed())
        };

        console::success(&format!(
            "    Finished deployment in {} seconds.",
            console::round_seconds(elapsed)
        ));
        if let Some(shell) = &self.shell {
            shell.forwarding.set_output(true);
        }

        match result {
            Ok(summary) => {
                info!(
                    deployment = run.sequence_number,
                    files = summary.files,
                    bytes = summary.bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "deployment completed"
                );
                DeployOutcome::Completed {
                    sequence_number: run.sequence_number,
                    elapsed,
                    summary,
                }
            }
            Err(e) => {
                warn!(deployment = run.sequence_number, error = %e, "deployment failed");
                console::error_chain("Deployment failed.", &e);
                DeployOutcome::Failed {
                    sequence_number: run.sequence_number,
                    elapsed,
                    error: e.to_string(),
                }
            }
        }
    }

    fn run_cycle(&self, run: &DeploymentRun) -> Result<TransferSummary, DeployError> {
        console::step(&format!(
            "Starting deployment ID {} - {}",
            run.sequence_number,
            run.started_at.format("%A, %B %-d, %Y %-I:%M:%S %p")
        ));

        let mut remote = self.remote.lock();
        remote.ensure_connected()?;
        self.run_pre_command_on(&mut *remote)?;

        let target = self.options.target.as_str();
        if remote.stat(target)?.is_none() {
            console::step(&format!(
                "Target Path '{target}' does not exist. -- Will attempt to create."
            ));
            ensure_directory(&mut *remote, target)?;
            console::step(&format!("Target Path '{target}' created successfully."));
        } else {
            ensure_directory(&mut *remote, target)?;
        }

        let mut summary = TransferSummary::default();
        if self.options.clean_target {
            console::step(&format!("Cleaning Target Path '{target}'"));
            summary.delete_failures = delete_tree(&mut *remote, target)?.failed.len();
        }

        let (files, bytes) = self.upload_all(&mut *remote)?;
        summary.files = files;
        summary.bytes = bytes;

        if self.options.allow_execute {
            let command = format!("chmod -R u+x {}", shell_quote(target));
            let output = remote.execute(&command)?;
            if !output.success() {
                console::warning(&format!(
                    "WARNING: '{command}' exited with status {}",
                    output.exit_status
                ));
            }
        }

        Ok(summary)
    }

    fn upload_all(&self, remote: &mut R) -> Result<(usize, u64), DeployError> {
        let source = self.options.source.as_path();
        let files = files_to_deploy(source, &self.options.excludes);
        console::step(&format!("Deploying {} files.", files.len()));

        let progress = upload_progress(files.len() as u64);
        let mut bytes = 0;
        for file in &files {
            let destination = remote_destination(source, file, &self.options.target)?;
            if let Some(parent) = remote_parent(&destination) {
                ensure_directory(remote, parent)?;
            }
            progress.set_message(destination.clone());
            bytes += remote
                .upload(file, &destination)
                .map_err(|source| DeployError::Upload {
                    local: file.clone(),
                    remote: destination.clone(),
                    source,
                })?;
            debug!(local = %file.display(), remote = %destination, "uploaded");
            progress.inc(1);
        }
        progress.finish_and_clear();
        Ok((files.len(), bytes))
    }

    /// Run the pre-deployment command on its own.
    pub fn run_pre_command(&self) -> Result<(), DeployError> {
        let mut remote = self.remote.lock();
        remote.ensure_connected()?;
        self.run_pre_command_on(&mut *remote)
    }

    fn run_pre_command_on(&self, remote: &mut R) -> Result<(), DeployError> {
        let Some(command) = non_blank(self.options.pre_command.as_deref()) else {
            return Ok(());
        };
        console::step("Executing SSH client command.");
        let output = remote.execute(command)?;
        console::transcript(&format!("    SSH TX: {command}"));
        console::transcript(&format!(
            "    SSH RX: [{}] {}",
            output.exit_status,
            output.stdout.trim_end()
        ));
        if !output.success() {
            warn!(command, status = output.exit_status, stderr = %output.stderr.trim_end(), "pre-deployment command failed");
        }
        Ok(())
    }

    /// Run the post-deployment command on its own.
    ///
    /// With a shell attached the command is typed into it and its output is
    /// shown as it arrives; otherwise it runs as a remote command. Failures
    /// are reported, not returned.
    pub fn run_post_command(&self) {
        let Some(command) = non_blank(self.options.post_command.as_deref()) else {
            return;
        };

        if let Some(shell) = &self.shell {
            console::step("Executing shell command.");
            shell.forwarding.set_output(true);
            if !shell.handle.send_line(command) {
                console::error("Shell session is closed; post-deployment command not sent.");
                return;
            }
            console::transcript(&format!("    TX: {command}"));
            return;
        }

        console::step("Executing SSH client command.");
        let mut remote = self.remote.lock();
        let result = remote
            .ensure_connected()
            .and_then(|()| remote.execute(command));
        match result {
            Ok(output) => {
                console::transcript(&format!("    SSH TX: {command}"));
                console::transcript(&format!(
                    "    SSH RX: [{}] {}",
                    output.exit_status,
                    output.stdout.trim_end()
                ));
            }
            Err(e) => {
                warn!(command, error = %e, "post-deployment command failed");
                console::error_chain("Post-deployment command failed.", &e);
            }
        }
    }
}

fn non_blank(command: Option<&str>) -> Option<&str> {
    command.map(str::trim).filter(|c| !c.is_empty())
}

fn remote_destination(source: &Path, file: &Path, target: &str) -> Result<String, DeployError> {
    remote_target_for(source, file, target).ok_or_else(|| DeployError::OutsideSource(file.to_path_buf()))
}

/// Single-quote `path` for a POSIX shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn upload_progress(len: u64) -> ProgressBar {
    if console::is_quiet() {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::stderr());
    let style = ProgressStyle::default_bar()
        .template("    {bar:40.green/white} {pos}/{len} {wide_msg}")
        .map(|style| style.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CommandOutput, MemoryRemote};
    use std::fs;
    use tempfile::TempDir;

    fn options(source: &Path) -> DeployOptions {
        DeployOptions {
            source: source.to_path_buf(),
            target: "/home/pi/app".into(),
            pre_command: None,
            post_command: None,
            clean_target: false,
            excludes: crate::deploy::parse_exclusions(crate::deploy::DEFAULT_EXCLUDES),
            allow_execute: false,
        }
    }

    fn source_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.dll"), b"binary").unwrap();
        fs::write(dir.path().join("sshdeploy.ready"), b"").unwrap();
        dir
    }

    #[test]
    fn numbers_start_at_one_and_advance() {
        let dir = source_tree();
        let deployer = Deployer::new(options(dir.path()), MemoryRemote::new());
        assert_eq!(deployer.deploy().sequence_number(), Some(1));
        assert_eq!(deployer.deploy().sequence_number(), Some(2));
        assert_eq!(deployer.next_deployment_number(), 3);
        assert!(!deployer.is_deploying());
    }

    #[test]
    fn commands_run_in_order() {
        let dir = source_tree();
        let mut opts = options(dir.path());
        opts.pre_command = Some("systemctl stop app".into());
        opts.post_command = Some("systemctl start app".into());
        opts.allow_execute = true;

        let deployer = Deployer::new(opts, MemoryRemote::new());
        let outcome = deployer.deploy();
        assert!(outcome.is_completed());

        let remote = deployer.into_remote();
        assert_eq!(
            remote.commands(),
            &[
                "systemctl stop app".to_string(),
                "chmod -R u+x '/home/pi/app'".to_string(),
                "systemctl start app".to_string(),
            ]
        );
        assert_eq!(remote.file_contents("/home/pi/app/app.dll"), Some(&b"binary"[..]));
        assert!(!remote.exists("/home/pi/app/sshdeploy.ready"));
    }

    #[test]
    fn failing_pre_command_is_soft() {
        let dir = source_tree();
        let mut opts = options(dir.path());
        opts.pre_command = Some("false".into());
        let mut remote = MemoryRemote::new();
        remote.respond_to(
            "false",
            CommandOutput {
                exit_status: 1,
                ..Default::default()
            },
        );

        let deployer = Deployer::new(opts, remote);
        assert!(deployer.deploy().is_completed());
    }

    #[test]
    fn post_command_skipped_on_failure() {
        let dir = source_tree();
        let mut opts = options(dir.path());
        opts.post_command = Some("reboot".into());
        let mut remote = MemoryRemote::new();
        remote.fail_upload_of("/home/pi/app/app.dll");

        let deployer = Deployer::new(opts, remote);
        let outcome = deployer.deploy();
        assert!(matches!(outcome, DeployOutcome::Failed { sequence_number: 1, .. }));
        assert!(!deployer.is_deploying());
        assert!(deployer.into_remote().commands().is_empty());
    }

    #[test]
    fn blank_commands_are_ignored() {
        let dir = source_tree();
        let mut opts = options(dir.path());
        opts.pre_command = Some("   ".into());
        let deployer = Deployer::new(opts, MemoryRemote::new());
        deployer.run_pre_command().unwrap();
        deployer.run_post_command();
        assert!(deployer.into_remote().commands().is_empty());
    }

    #[test]
    fn quotes_paths_for_the_shell() {
        assert_eq!(shell_quote("/srv/it's"), r"'/srv/it'\''s'");
    }
}
