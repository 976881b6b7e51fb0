//! Local file-system change detection.
//!
//! - **snapshot**: last-known metadata per file, keyed case-insensitively
//! - **detector**: baseline + diff scans producing [`ChangeEvent`]s
//! - **poller**: the cancellable background thread that drives the detector
//! - **watch**: a `notify`-based watcher used when polling is disabled
//!
//! # Example
//!
//! ```rust,ignore
//! use sshdeploy::monitor::FileSystemMonitor;
//!
//! let mut monitor = FileSystemMonitor::new("bin/Release", 1);
//! monitor.subscribe(|event| println!("{event}"));
//! monitor.start()?;
//! // ...
//! monitor.stop();
//! ```

pub mod detector;
pub mod event;
pub mod poller;
pub mod snapshot;
pub mod watch;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use detector::ChangeDetector;
pub use event::{ChangeEvent, ChangeKind};
pub use poller::{
    FileSystemMonitor, ListenerId, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
    MonitorProgress, validate_interval,
};
pub use snapshot::{FileEntry, Snapshot};
pub use watch::TriggerWatcher;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Poll interval must be between 1 and 60 seconds (got {0})")]
    InvalidInterval(u64),

    #[error("Source path '{}' does not point to a valid folder", .0.display())]
    SourceNotFound(PathBuf),

    #[error("File system monitor is already running")]
    AlreadyRunning,

    #[error("Failed to scan '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File watcher failed: {0}")]
    Notify(#[from] notify::Error),
}

impl MonitorError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error stems from invalid configuration rather than a
    /// runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidInterval(_) | Self::SourceNotFound(_))
    }
}
