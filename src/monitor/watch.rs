//! Event-driven alternative to the polling monitor.
//!
//! Used when polling is disabled. Native notifications are cheaper but less
//! reliable for some build tools, which is why polling stays the default.

use std::path::Path;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};

use super::MonitorError;
use super::event::{ChangeEvent, ChangeKind};

/// Wraps a `notify` watcher and forwards its events as [`ChangeEvent`]s.
///
/// The callback runs on notify's internal thread. Dropping the watcher stops it.
pub struct TriggerWatcher {
    _watcher: RecommendedWatcher,
}

impl TriggerWatcher {
    pub fn start(
        root: &Path,
        callback: impl Fn(&ChangeEvent) + Send + 'static,
    ) -> Result<Self, MonitorError> {
        if !root.is_dir() {
            return Err(MonitorError::SourceNotFound(root.to_path_buf()));
        }

        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let Some(kind) = change_kind(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    callback(&ChangeEvent::new(kind, path));
                }
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");

        Ok(Self { _watcher: watcher })
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn maps_notify_kinds() {
        assert_eq!(change_kind(&EventKind::Create(CreateKind::File)), Some(ChangeKind::Added));
        assert_eq!(change_kind(&EventKind::Modify(ModifyKind::Any)), Some(ChangeKind::Modified));
        assert_eq!(change_kind(&EventKind::Remove(RemoveKind::File)), Some(ChangeKind::Removed));
        assert_eq!(change_kind(&EventKind::Access(AccessKind::Any)), None);
    }
}
