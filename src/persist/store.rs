//! Durable key/value record store
//!
//! `set` and `clear` stage changes; `commit` is the durability barrier. A
//! missing key is reported as `Ok(None)`, which callers treat as "nothing
//! recorded" rather than an error.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Namespaced integer store surviving restarts
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<i64>>;

    fn set(&self, key: &str, value: i64) -> Result<()>;

    fn clear(&self, key: &str) -> Result<()>;

    /// Make all staged changes durable
    fn commit(&self) -> Result<()>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, i64>>;

/// JSON document on disk holding one map per namespace
pub struct FileRecordStore {
    path: PathBuf,
    namespace: String,
    staged: Mutex<BTreeMap<String, i64>>,
}

impl FileRecordStore {
    /// Open `namespace` inside the store file at `path`. A missing file is an
    /// empty store.
    pub fn open(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let namespace = namespace.into();
        let current = read_namespaces(&path)?
            .remove(&namespace)
            .unwrap_or_default();

        Ok(Self {
            path,
            namespace,
            staged: Mutex::new(current),
        })
    }

    fn staged(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, i64>>> {
        self.staged
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))
    }
}

fn read_namespaces(path: &Path) -> Result<Namespaces> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Namespaces::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing record store {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Namespaces::new()),
        Err(e) => Err(e).with_context(|| format!("reading record store {}", path.display())),
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.staged()?.get(key).copied())
    }

    fn set(&self, key: &str, value: i64) -> Result<()> {
        self.staged()?.insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.staged()?.remove(key);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let staged = self.staged()?.clone();

        // Other namespaces in the same file are carried over untouched
        let mut all = read_namespaces(&self.path)?;
        all.insert(self.namespace.clone(), staged);
        let body = serde_json::to_vec_pretty(&all)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        debug!("Committed namespace {} to {}", self.namespace, self.path.display());
        Ok(())
    }
}
