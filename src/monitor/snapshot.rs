//! In-memory record of the last observed state of every tracked file.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Metadata captured for a single file during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path of the file, as enumerated.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Creation (birth) time, when the platform reports it.
    pub created: Option<SystemTime>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
}

impl FileEntry {
    /// Read the current metadata of `path`.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            created: metadata.created().ok(),
            modified: metadata.modified().ok(),
        }
    }

    /// True when size or either timestamp differ from `other`.
    pub fn differs_from(&self, other: &FileEntry) -> bool {
        self.size != other.size || self.created != other.created || self.modified != other.modified
    }
}

/// Case-insensitive key used for snapshot lookups.
pub fn snapshot_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Mapping of path to last-known [`FileEntry`].
///
/// Keys compare case-insensitively. Iteration follows the sorted key order so
/// that anything derived from a snapshot is reproducible.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    entries: BTreeMap<String, FileEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&FileEntry> {
        self.entries.get(&snapshot_key(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&snapshot_key(path))
    }

    /// Insert or replace the entry for `entry.path`, returning the previous one.
    pub fn upsert(&mut self, entry: FileEntry) -> Option<FileEntry> {
        self.entries.insert(snapshot_key(&entry.path), entry)
    }

    pub fn remove(&mut self, path: &Path) -> Option<FileEntry> {
        self.entries.remove(&snapshot_key(path))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    /// Remove every entry whose key is not in `present`, returning the removed
    /// entries in snapshot order.
    pub(crate) fn retain_keys(
        &mut self,
        present: &std::collections::HashSet<String>,
    ) -> Vec<FileEntry> {
        let missing: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !present.contains(*key))
            .cloned()
            .collect();
        missing
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }
}
