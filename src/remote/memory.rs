//! In-memory remote host.
//!
//! Behaves like a strict SFTP server (parents must exist, only empty
//! directories can be removed) so that pipeline code exercised against it
//! behaves the same against a real target. Used by `push --dry-run` and by
//! tests, which can also inject failures and observe every call.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::info;

use super::{
    CommandOutput, RemoteCommand, RemoteEntry, RemoteError, RemoteFiles, RemoteKind,
    RemoteSession, remote_parent,
};

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Vec<u8>),
}

type CommandHook = Box<dyn FnMut(&str) + Send>;

/// A remote file tree and command log kept in memory.
pub struct MemoryRemote {
    nodes: BTreeMap<String, Node>,
    commands: Vec<String>,
    responses: BTreeMap<String, CommandOutput>,
    created_dirs: Vec<String>,
    uploads: Vec<(PathBuf, String)>,
    failing_removals: HashSet<String>,
    failing_uploads: HashSet<String>,
    command_hook: Option<CommandHook>,
    connect_checks: usize,
    verbose: bool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            nodes,
            commands: Vec::new(),
            responses: BTreeMap::new(),
            created_dirs: Vec::new(),
            uploads: Vec::new(),
            failing_removals: HashSet::new(),
            failing_uploads: HashSet::new(),
            command_hook: None,
            connect_checks: 0,
            verbose: false,
        }
    }

    /// Log every operation at info level (used for dry runs).
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Seed a directory, creating missing parents.
    pub fn insert_dir(&mut self, path: &str) {
        let path = normalize(path);
        if let Some(parent) = remote_parent(&path) {
            let parent = parent.to_string();
            if !self.nodes.contains_key(&parent) {
                self.insert_dir(&parent);
            }
        }
        self.nodes.insert(path, Node::Directory);
    }

    /// Seed a file, creating missing parents.
    pub fn insert_file(&mut self, path: &str, contents: &[u8]) {
        let path = normalize(path);
        if let Some(parent) = remote_parent(&path) {
            self.insert_dir(parent);
        }
        self.nodes.insert(path, Node::File(contents.to_vec()));
    }

    /// Canned output for a specific command line.
    pub fn respond_to(&mut self, command: &str, output: CommandOutput) {
        self.responses.insert(command.to_string(), output);
    }

    /// Called with every executed command before it completes.
    pub fn on_execute(&mut self, hook: impl FnMut(&str) + Send + 'static) {
        self.command_hook = Some(Box::new(hook));
    }

    /// Make deleting `path` fail.
    pub fn fail_removal_of(&mut self, path: &str) {
        self.failing_removals.insert(normalize(path));
    }

    /// Make uploading to `path` fail.
    pub fn fail_upload_of(&mut self, path: &str) {
        self.failing_uploads.insert(normalize(path));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Directory))
    }

    pub fn file_contents(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::File(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Every path currently present, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn created_dirs(&self) -> Vec<String> {
        self.created_dirs.clone()
    }

    pub fn uploads(&self) -> &[(PathBuf, String)] {
        &self.uploads
    }

    pub fn connect_checks(&self) -> usize {
        self.connect_checks
    }

    fn children_of(&self, path: &str) -> Vec<RemoteEntry> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .iter()
            .filter(|(key, _)| {
                key.len() > prefix.len() && key.starts_with(&prefix) && !key[prefix.len()..].contains('/')
            })
            .map(|(key, node)| RemoteEntry {
                name: key[prefix.len()..].to_string(),
                path: key.clone(),
                kind: match node {
                    Node::Directory => RemoteKind::Directory,
                    Node::File(_) => RemoteKind::File,
                },
            })
            .collect()
    }

    fn trace(&self, operation: &str, path: &str) {
        if self.verbose {
            info!(operation, path, "dry run");
        }
    }
}

impl RemoteCommand for MemoryRemote {
    fn execute(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.trace("execute", command);
        self.commands.push(command.to_string());
        if let Some(hook) = self.command_hook.as_mut() {
            hook(command);
        }
        Ok(self.responses.get(command).cloned().unwrap_or_default())
    }
}

impl RemoteFiles for MemoryRemote {
    fn stat(&mut self, path: &str) -> Result<Option<RemoteKind>, RemoteError> {
        Ok(self.nodes.get(&normalize(path)).map(|node| match node {
            Node::Directory => RemoteKind::Directory,
            Node::File(_) => RemoteKind::File,
        }))
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(Node::Directory) => Ok(self.children_of(&path)),
            Some(Node::File(_)) => Err(RemoteError::NotADirectory(path)),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    fn create_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = normalize(path);
        self.trace("mkdir", &path);
        if self.nodes.contains_key(&path) {
            return Err(RemoteError::operation("mkdir", &path, "already exists"));
        }
        match remote_parent(&path) {
            Some(parent) if self.is_dir(parent) => {}
            _ => return Err(RemoteError::operation("mkdir", &path, "no such parent directory")),
        }
        self.nodes.insert(path.clone(), Node::Directory);
        self.created_dirs.push(path);
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = normalize(path);
        self.trace("rm", &path);
        if self.failing_removals.contains(&path) {
            return Err(RemoteError::operation("rm", &path, "permission denied"));
        }
        match self.nodes.get(&path) {
            Some(Node::File(_)) => {
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::Directory) => Err(RemoteError::operation("rm", &path, "is a directory")),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        let path = normalize(path);
        self.trace("rmdir", &path);
        if self.failing_removals.contains(&path) {
            return Err(RemoteError::operation("rmdir", &path, "permission denied"));
        }
        match self.nodes.get(&path) {
            Some(Node::Directory) if path == "/" => {
                Err(RemoteError::operation("rmdir", &path, "cannot remove root"))
            }
            Some(Node::Directory) => {
                if !self.children_of(&path).is_empty() {
                    return Err(RemoteError::operation("rmdir", &path, "directory not empty"));
                }
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::File(_)) => Err(RemoteError::NotADirectory(path)),
            None => Err(RemoteError::NotFound(path)),
        }
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let remote = normalize(remote);
        self.trace("put", &remote);
        if self.failing_uploads.contains(&remote) {
            return Err(RemoteError::operation("put", &remote, "connection reset"));
        }
        match remote_parent(&remote) {
            Some(parent) if self.is_dir(parent) => {}
            _ => return Err(RemoteError::operation("put", &remote, "no such parent directory")),
        }
        if self.is_dir(&remote) {
            return Err(RemoteError::operation("put", &remote, "is a directory"));
        }
        let bytes = std::fs::read(local).map_err(|e| RemoteError::local_io(local, e))?;
        let len = bytes.len() as u64;
        self.nodes.insert(remote.clone(), Node::File(bytes));
        self.uploads.push((local.to_path_buf(), remote));
        Ok(len)
    }
}

impl RemoteSession for MemoryRemote {
    fn ensure_connected(&mut self) -> Result<(), RemoteError> {
        self.connect_checks += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run (in memory)".to_string()
    }
}
