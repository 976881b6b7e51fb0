//! Scan-and-diff change detection over a directory tree.
//!
//! [`ChangeDetector`] holds the [`Snapshot`] of a root directory. The first
//! scan ([`ChangeDetector::baseline`]) records what is already there without
//! reporting anything; every later [`ChangeDetector::poll`] rescans the tree
//! and reports the difference as [`ChangeEvent`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use walkdir::WalkDir;

use super::MonitorError;
use super::event::ChangeEvent;
use super::snapshot::{FileEntry, Snapshot, snapshot_key};

pub struct ChangeDetector {
    root: PathBuf,
    snapshot: Snapshot,
}

impl ChangeDetector {
    /// Create a detector for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(MonitorError::SourceNotFound(root.to_path_buf()));
        }
        let root = root
            .canonicalize()
            .map_err(|e| MonitorError::io(root, e))?;
        Ok(Self {
            root,
            snapshot: Snapshot::new(),
        })
    }

    /// Canonical root directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Record the current contents of the tree without reporting changes.
    ///
    /// Returns the number of tracked files.
    pub fn baseline(&mut self) -> Result<usize, MonitorError> {
        self.snapshot.clear();
        for path in enumerate_files(&self.root)? {
            match FileEntry::read(&path) {
                Ok(entry) => {
                    self.snapshot.upsert(entry);
                }
                Err(e) => trace!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }
        debug!(root = %self.root.display(), files = self.snapshot.len(), "baseline recorded");
        Ok(self.snapshot.len())
    }

    /// Rescan the tree and return what changed since the previous scan.
    ///
    /// Removals come first, in snapshot order; additions and modifications
    /// follow in scan order.
    pub fn poll(&mut self) -> Result<Vec<ChangeEvent>, MonitorError> {
        let files = enumerate_files(&self.root)?;
        let present: HashSet<String> = files.iter().map(|p| snapshot_key(p)).collect();

        let mut events: Vec<ChangeEvent> = self
            .snapshot
            .retain_keys(&present)
            .into_iter()
            .map(|entry| ChangeEvent::removed(entry.path))
            .collect();

        for path in files {
            let current = match FileEntry::read(&path) {
                Ok(entry) => entry,
                Err(e) => {
                    // Deleted mid-scan or not readable; try again next cycle.
                    trace!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            match self.snapshot.get(&path) {
                None => {
                    self.snapshot.upsert(current);
                    events.push(ChangeEvent::added(path));
                }
                Some(existing) if current.differs_from(existing) => {
                    self.snapshot.upsert(current);
                    events.push(ChangeEvent::modified(path));
                }
                Some(_) => {}
            }
        }

        Ok(events)
    }

    /// Forget everything tracked so far.
    pub fn clear(&mut self) {
        self.snapshot.clear();
    }
}

/// List every non-directory entry below `root`, sorted by file name per level.
///
/// Entries that cannot be read (permission denied, vanished) are skipped; only
/// a missing root fails the scan.
pub fn enumerate_files(root: &Path) -> Result<Vec<PathBuf>, MonitorError> {
    if !root.is_dir() {
        return Err(MonitorError::SourceNotFound(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if !entry.file_type().is_dir() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) if e.depth() == 0 => {
                return Err(MonitorError::Walk {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => trace!(error = %e, "skipping unreadable entry"),
        }
    }
    Ok(files)
}
