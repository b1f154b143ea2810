use std::fs;
use std::path::{Path, PathBuf};

use photo_inventory::model::types::Candidate;
use photo_inventory::storage::sqlite::{InventoryStore, MergeTarget};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
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

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Temp directory holding a fresh store at `inventory.db`.
#[allow(dead_code)]
pub struct Fixture {
    pub dir: TempDir,
    pub store: InventoryStore,
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = InventoryStore::open(&dir.path().join("inventory.db")).unwrap();
        Self { dir, store }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("inventory.db")
    }

    pub fn local(&self, path: &str, size: u64) {
        let name = path.rsplit('/').next().unwrap();
        self.store
            .merge(&Candidate::local(path, name, size))
            .unwrap();
    }

    pub fn remote(&self, path: &str, size: u64) {
        let name = path.rsplit('/').next().unwrap();
        self.store
            .merge(&Candidate::remote("nas", path, name, size))
            .unwrap();
    }
}

/// Write `bytes` to `root/rel`, creating parent directories.
#[allow(dead_code)]
pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, bytes).unwrap();
    path
}
