use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use sshdeploy::deploy::{DEFAULT_EXCLUDES, DeployOptions, parse_exclusions};
use sshdeploy::remote::MemoryRemote;
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A build output folder with a couple of files.
#[allow(dead_code)]
pub struct SourceTree {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl SourceTree {
    pub fn new() -> Self {
        let tree = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        tree.write("app.dll", b"main assembly");
        tree.write("app.runtimeconfig.json", b"{}");
        tree
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &[u8]) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn options(&self, target: &str) -> DeployOptions {
        DeployOptions {
            source: self.dir.path().to_path_buf(),
            target: target.to_string(),
            pre_command: None,
            post_command: None,
            clean_target: false,
            excludes: parse_exclusions(DEFAULT_EXCLUDES),
            allow_execute: false,
        }
    }
}

/// A remote that already holds a previous deployment.
#[allow(dead_code)]
pub fn remote_with_stale_files(target: &str) -> MemoryRemote {
    let mut remote = MemoryRemote::new();
    remote.insert_file(&format!("{target}/old.dll"), b"stale");
    remote.insert_file(&format!("{target}/logs/app.log"), b"stale");
    remote
}
