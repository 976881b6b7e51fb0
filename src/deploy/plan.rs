//! What to transfer and where it lands.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::monitor::{ChangeEvent, ChangeKind};
use crate::remote::remote_join;

/// Suffixes excluded when none are configured.
pub const DEFAULT_EXCLUDES: &str = ".ready|.vshost.exe|.vshost.exe.config";

/// Split a pipe-separated exclusion list, dropping empty entries.
pub fn parse_exclusions(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|suffix| !suffix.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `path` ends with any of `excludes` (case-sensitive).
pub fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    let text = path.to_string_lossy();
    excludes.iter().any(|suffix| text.ends_with(suffix.as_str()))
}

/// Every file below `source`, minus excluded ones, in walk order.
///
/// Entries that cannot be read are skipped with a warning.
pub fn files_to_deploy(source: &Path, excludes: &[String]) -> Vec<PathBuf> {
    WalkDir::new(source)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| !entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| !is_excluded(path, excludes))
        .collect()
}

/// Remote destination of `file`: its path relative to `source`, joined under
/// `target` with `/` separators.
///
/// Returns `None` when `file` is not below `source`.
pub fn remote_target_for(source: &Path, file: &Path, target: &str) -> Option<String> {
    let relative = file.strip_prefix(source).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(remote_join(target, &parts.join("/")))
}

/// Whether `event` should start a deployment: the trigger file was created or
/// written.
pub fn is_deployment_trigger(event: &ChangeEvent, trigger: &Path) -> bool {
    matches!(event.kind, ChangeKind::Added | ChangeKind::Modified)
        && event
            .path()
            .to_string_lossy()
            .eq_ignore_ascii_case(&trigger.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_pipe_separated_list() {
        assert_eq!(
            parse_exclusions(DEFAULT_EXCLUDES),
            vec![".ready", ".vshost.exe", ".vshost.exe.config"]
        );
        assert_eq!(parse_exclusions("|.pdb||"), vec![".pdb"]);
        assert!(parse_exclusions("").is_empty());
    }

    #[test]
    fn suffix_match_is_case_sensitive() {
        let excludes = parse_exclusions(".ready");
        assert!(is_excluded(Path::new("out/build.ready"), &excludes));
        assert!(!is_excluded(Path::new("out/app.ready.bin"), &excludes));
        assert!(!is_excluded(Path::new("out/build.READY"), &excludes));
    }

    #[test]
    fn lists_nested_files_and_skips_excluded() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib/native")).unwrap();
        fs::write(dir.path().join("app.dll"), b"a").unwrap();
        fs::write(dir.path().join("sshdeploy.ready"), b"").unwrap();
        fs::write(dir.path().join("lib/native/x.so"), b"x").unwrap();

        let files = files_to_deploy(dir.path(), &parse_exclusions(DEFAULT_EXCLUDES));
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![PathBuf::from("app.dll"), Path::new("lib").join("native").join("x.so")]
        );
    }

    #[test]
    fn remote_target_preserves_structure() {
        let source = Path::new("/build/out");
        assert_eq!(
            remote_target_for(source, &source.join("lib").join("a.so"), "/home/pi/app").as_deref(),
            Some("/home/pi/app/lib/a.so")
        );
        assert_eq!(
            remote_target_for(source, &source.join("main"), "/opt/app/").as_deref(),
            Some("/opt/app/main")
        );
        assert_eq!(remote_target_for(source, Path::new("/elsewhere/x"), "/opt"), None);
    }

    #[test]
    fn trigger_requires_add_or_modify_of_trigger_path() {
        let trigger = Path::new("/build/out/sshdeploy.ready");
        assert!(is_deployment_trigger(&ChangeEvent::added(trigger), trigger));
        assert!(is_deployment_trigger(
            &ChangeEvent::modified("/build/out/SSHDeploy.READY"),
            trigger
        ));
        assert!(!is_deployment_trigger(&ChangeEvent::removed(trigger), trigger));
        assert!(!is_deployment_trigger(
            &ChangeEvent::added("/build/out/app.dll"),
            trigger
        ));
    }
}
