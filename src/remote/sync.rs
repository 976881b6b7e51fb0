//! Recursive directory creation and deletion on the remote host.
//!
//! Both operations query the remote on every step; nothing is cached.

use tracing::{debug, warn};

use super::{REMOTE_SEPARATOR, RemoteError, RemoteFiles, RemoteKind};

/// Outcome of [`delete_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Entries removed.
    pub removed: usize,
    /// Paths that could not be listed or removed.
    pub failed: Vec<String>,
}

impl DeleteSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Make sure `path` exists as a directory, creating missing ancestors first.
///
/// `path` must be absolute. Calling this on an existing directory does
/// nothing.
pub fn ensure_directory<R: RemoteFiles + ?Sized>(
    remote: &mut R,
    path: &str,
) -> Result<(), RemoteError> {
    if !path.starts_with(REMOTE_SEPARATOR) {
        return Err(RemoteError::NotAbsolute(path.to_string()));
    }

    let components: Vec<&str> = path
        .split(REMOTE_SEPARATOR)
        .filter(|part| !part.is_empty())
        .collect();
    if components.is_empty() {
        return Ok(());
    }
    let normalized = format!("/{}", components.join("/"));

    match remote.stat(&normalized)? {
        Some(RemoteKind::Directory) => return Ok(()),
        Some(RemoteKind::File) => return Err(RemoteError::NotADirectory(normalized)),
        None => {}
    }

    if components.len() > 1 {
        let parent = format!("/{}", components[..components.len() - 1].join("/"));
        ensure_directory(remote, &parent)?;
    }

    debug!(path = %normalized, "creating remote directory");
    remote.create_dir(&normalized)
}

/// Delete everything below `path`, leaving `path` itself in place.
///
/// Best effort: a child that cannot be removed is logged and skipped, and its
/// siblings are still attempted. Only failing to list `path` itself is an
/// error.
pub fn delete_tree<R: RemoteFiles + ?Sized>(
    remote: &mut R,
    path: &str,
) -> Result<DeleteSummary, RemoteError> {
    let mut summary = DeleteSummary::default();
    let children = remote.list_dir(path)?;
    delete_children(remote, children, &mut summary);
    Ok(summary)
}

fn delete_children<R: RemoteFiles + ?Sized>(
    remote: &mut R,
    children: Vec<super::RemoteEntry>,
    summary: &mut DeleteSummary,
) {
    for child in children {
        if child.is_self_or_parent() {
            continue;
        }

        if child.is_directory() {
            match remote.list_dir(&child.path) {
                Ok(grandchildren) => delete_children(remote, grandchildren, summary),
                Err(e) => {
                    warn!(path = %child.path, error = %e, "failed to list remote directory");
                }
            }
        }

        let result = if child.is_directory() {
            remote.remove_dir(&child.path)
        } else {
            remote.remove_file(&child.path)
        };

        match result {
            Ok(()) => summary.removed += 1,
            Err(e) => {
                warn!(path = %child.path, error = %e, "failed to delete file or folder");
                crate::console::warning(&format!(
                    "WARNING: Failed to delete file or folder '{}'",
                    child.path
                ));
                summary.failed.push(child.path);
            }
        }
    }
}
