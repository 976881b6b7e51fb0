//! Remote host access.
//!
//! The deployment pipeline talks to the target through two small traits:
//!
//! - [`RemoteCommand`]: run a command and collect its exit status and output
//! - [`RemoteFiles`]: query, list, create, delete and upload remote paths
//!
//! [`RemoteSession`] bundles both and adds a liveness check. The production
//! implementation is [`ssh::SshConnection`]; [`memory::MemoryRemote`] keeps a
//! remote tree in memory for dry runs and tests.
//!
//! Remote paths are plain strings using `/` as separator.

pub mod memory;
pub mod ssh;
pub mod sync;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use memory::MemoryRemote;
pub use ssh::{ConnectionOptions, SshConnection};
pub use sync::{DeleteSummary, delete_tree, ensure_directory};

/// Separator used on the remote host.
pub const REMOTE_SEPARATOR: char = '/';

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Argument path must start with /: '{0}'")]
    NotAbsolute(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("Authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Remote path '{0}' exists and is not a directory")]
    NotADirectory(String),

    #[error("{operation} '{path}' failed: {message}")]
    Operation {
        operation: &'static str,
        path: String,
        message: String,
    },

    #[error("Failed to read local file '{}': {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn operation(operation: &'static str, path: &str, message: impl ToString) -> Self {
        Self::Operation {
            operation,
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn local_io(path: &Path, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Type of a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Directory,
}

/// One child returned by [`RemoteFiles::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name only.
    pub name: String,
    /// Absolute remote path.
    pub path: String,
    pub kind: RemoteKind,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == RemoteKind::Directory
    }

    /// `.` and `..` as reported by some servers.
    pub fn is_self_or_parent(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Remote command execution.
pub trait RemoteCommand {
    fn execute(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Remote file-transfer operations. Every call is a live query.
pub trait RemoteFiles {
    /// Type of `path`, or `None` when it does not exist.
    fn stat(&mut self, path: &str) -> Result<Option<RemoteKind>, RemoteError>;

    /// Immediate children of `path`.
    fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Create a single directory. The parent must exist.
    fn create_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Remove an empty directory.
    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Stream `local` to the absolute remote path `remote`, returning the
    /// number of bytes written.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError>;
}

/// A connected remote host: commands, file transfer and a liveness check.
pub trait RemoteSession: RemoteCommand + RemoteFiles + Send {
    /// Check the connection and reconnect if it was lost.
    fn ensure_connected(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Human-readable description of the target, e.g. `pi@10.0.0.2:22`.
    fn describe(&self) -> String;
}

/// Join a relative path (using either separator) under a remote directory.
pub fn remote_join(base: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches(REMOTE_SEPARATOR);
    let base = base.trim_end_matches(REMOTE_SEPARATOR);
    if relative.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{base}/{relative}")
}

/// Parent directory of an absolute remote path (`/` for top-level entries).
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(REMOTE_SEPARATOR);
    match trimmed.rfind(REMOTE_SEPARATOR) {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}
