//! Persisted key/value substrate.
//!
//! Everything that must survive a restart (the credential list, the rotation
//! pointer, per-credential health, cached API results) goes through a
//! [`KvStore`]. Values are plain JSON so any backend that can hold strings can
//! implement the trait.

use eyre::Context;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};

/// One entry of a [`KvStore::write_batch`]; `None` deletes the key.
pub type BatchEntry<'a> = (&'a str, Option<Value>);

pub trait KvStore: std::fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> eyre::Result<()>;

    fn delete(&self, key: &str) -> eyre::Result<()>;

    /// All keys currently stored, in lexicographic order.
    fn keys(&self) -> Vec<String>;

    /// Applies several sets and deletes as one write.
    fn write_batch(&self, entries: Vec<BatchEntry<'_>>) -> eyre::Result<()> {
        for (key, value) in entries {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.delete(key)?,
            }
        }
        Ok(())
    }

    /// Removes every key starting with `prefix`, returning how many went away.
    fn delete_prefix(&self, prefix: &str) -> eyre::Result<usize> {
        let doomed: Vec<_> = self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len())
    }
}

/// A store that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> eyre::Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> eyre::Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn write_batch(&self, entries: Vec<BatchEntry<'_>>) -> eyre::Result<()> {
        apply(&mut self.entries.write(), entries);
        Ok(())
    }
}

fn apply(map: &mut BTreeMap<String, Value>, entries: Vec<BatchEntry<'_>>) -> bool {
    let mut changed = false;
    for (key, value) in entries {
        changed |= match value {
            Some(value) => {
                map.insert(key.to_string(), value);
                true
            }
            None => map.remove(key).is_some(),
        };
    }
    changed
}

/// A store backed by a single JSON object on disk.
///
/// The whole map is held in memory and the file is rewritten after every
/// mutation (write to a sibling temp file, then rename). Inside a
/// multi-threaded tokio runtime the rewrite runs under
/// [`tokio::task::block_in_place`] so other tasks move off the worker.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse store file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "store file missing, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read store file {}", path.display()));
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> eyre::Result<()> {
        let json = serde_json::to_vec_pretty(entries).context("serialize store")?;
        let write = || -> eyre::Result<()> {
            let tmp = self.path.with_extension("tmp");
            std::fs::write(&tmp, &json)
                .with_context(|| format!("write store file {}", tmp.display()))?;
            std::fs::rename(&tmp, &self.path)
                .with_context(|| format!("replace store file {}", self.path.display()))?;
            Ok(())
        };

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(write)
            }
            _ => write(),
        }
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> eyre::Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn delete(&self, key: &str) -> eyre::Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn write_batch(&self, entries: Vec<BatchEntry<'_>>) -> eyre::Result<()> {
        let mut map = self.entries.write();
        if apply(&mut map, entries) {
            self.flush(&map)?;
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> eyre::Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            self.flush(&entries)?;
        }
        Ok(removed)
    }
}
