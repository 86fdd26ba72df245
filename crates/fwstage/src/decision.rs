//! Persisted one-shot boot decision
//!
//! The decision is a single boolean in a namespaced key/value store. Every
//! write is committed before returning, so the flag survives an immediate
//! power loss, and a consumed flag is cleared before anything acts on it, so
//! it can never fire twice.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;

/// Namespace reserved for this subsystem
pub const DEFAULT_NAMESPACE: &str = "fwstage";

/// Key of the one-shot flag
pub const RUN_ONCE_KEY: &str = "run_once";

/// Non-volatile key/value storage with explicit commits
pub trait KvStore: Send {
    /// Read a boolean, `None` if unset
    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError>;

    /// Stage a boolean write; durable only after [`commit`](Self::commit)
    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError>;

    /// Make staged writes durable
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// In-memory [`KvStore`] that models uncommitted writes being lost
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    committed: HashMap<(String, String), bool>,
    pending: HashMap<(String, String), bool>,
    commits: usize,
}

impl MemoryKvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Drop uncommitted writes, as a power loss would
    pub fn power_cycle(&mut self) {
        self.pending.clear();
    }
}

impl KvStore for MemoryKvStore {
    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError> {
        let k = (namespace.to_string(), key.to_string());
        Ok(self
            .pending
            .get(&k)
            .or_else(|| self.committed.get(&k))
            .copied())
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError> {
        self.pending
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.committed.extend(self.pending.drain());
        self.commits += 1;
        Ok(())
    }
}

type Document = BTreeMap<String, BTreeMap<String, Value>>;

/// [`KvStore`] persisted as a JSON document.
///
/// Commits write a sibling temp file, sync it, and rename it over the
/// original, so a reader sees either the old or the new document.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    doc: Document,
    dirty: bool,
}

impl FileKvStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "Opened key/value store");
        Ok(Self {
            path,
            doc,
            dirty: false,
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace `path` with `data` so readers see either the old or new content.
///
/// Writes a sibling `.tmp` file, syncs it, renames it into place, then
/// syncs the directory where the platform allows it.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    let temp = path.with_file_name(name);

    {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), "Directory sync unavailable: {}", e);
        }
    }
    Ok(())
}

impl KvStore for FileKvStore {
    fn get_bool(&self, namespace: &str, key: &str) -> Result<Option<bool>, StoreError> {
        match self.doc.get(namespace).and_then(|ns| ns.get(key)) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(StoreError::Corrupt(format!(
                "{namespace}.{key} is not a boolean: {other}"
            ))),
        }
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), StoreError> {
        self.doc
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Value::Bool(value));
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }

        let data = serde_json::to_vec_pretty(&self.doc)?;
        write_atomic(&self.path, &data)?;
        self.dirty = false;
        Ok(())
    }
}

/// Owner of the persisted one-shot boot flag
#[derive(Debug)]
pub struct BootDecisionStore<S> {
    store: S,
    namespace: String,
}

impl<S: KvStore> BootDecisionStore<S> {
    /// Wrap a store using the default namespace
    pub fn new(store: S) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    /// Wrap a store using a custom namespace
    pub fn with_namespace(store: S, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Persist a request to boot the staged image on the next start.
    ///
    /// Returns only after the write is committed.
    pub fn request_run_once(&mut self) -> Result<(), StoreError> {
        self.store.set_bool(&self.namespace, RUN_ONCE_KEY, true)?;
        self.store.commit()?;
        info!(namespace = %self.namespace, "One-shot boot of staged image requested");
        Ok(())
    }

    /// Read the flag without consuming it
    pub fn peek(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_bool(&self.namespace, RUN_ONCE_KEY)?
            .unwrap_or(false))
    }

    /// Read and clear the flag, returning its prior value.
    ///
    /// A set flag is cleared and committed before `true` is returned. If the
    /// flag cannot be read, or cannot be cleared durably, this returns
    /// `false` so that the staged image is not booted.
    pub fn consume_and_clear(&mut self) -> bool {
        let requested = match self.peek() {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to read boot decision, treating as unset: {}", e);
                return false;
            }
        };

        if !requested {
            return false;
        }

        let cleared = self
            .store
            .set_bool(&self.namespace, RUN_ONCE_KEY, false)
            .and_then(|()| self.store.commit());

        match cleared {
            Ok(()) => {
                info!("Consumed one-shot boot request");
                true
            }
            Err(e) => {
                warn!("Could not clear one-shot boot flag, ignoring request: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[test]
    fn test_one_shot_fires_once() -> Result<(), StoreError> {
        let mut decision = BootDecisionStore::new(MemoryKvStore::new());
        assert!(!decision.peek()?);

        decision.request_run_once()?;
        assert!(decision.peek()?);

        assert!(decision.consume_and_clear());
        assert!(!decision.consume_and_clear());
        Ok(())
    }

    #[test]
    fn test_request_is_committed_before_return() -> Result<(), StoreError> {
        let mut decision = BootDecisionStore::new(MemoryKvStore::new());
        decision.request_run_once()?;

        decision.store_mut().power_cycle();
        assert!(decision.peek()?);
        assert_eq!(decision.store().commit_count(), 1);
        Ok(())
    }

    #[test]
    fn test_clear_is_committed_before_firing() -> Result<(), StoreError> {
        let mut decision = BootDecisionStore::new(MemoryKvStore::new());
        decision.request_run_once()?;
        assert!(decision.consume_and_clear());

        decision.store_mut().power_cycle();
        assert!(!decision.peek()?);
        assert_eq!(decision.store().commit_count(), 2);
        Ok(())
    }

    #[test]
    fn test_unset_flag_does_not_commit() {
        let mut decision = BootDecisionStore::new(MemoryKvStore::new());
        assert!(!decision.consume_and_clear());
        assert_eq!(decision.store().commit_count(), 0);
    }

    #[test]
    fn test_file_store_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nvs.json");

        let mut store = FileKvStore::open(&path)?;
        assert_eq!(store.get_bool("fwstage", "run_once")?, None);
        store.set_bool("fwstage", "run_once", true)?;
        store.commit()?;

        let reopened = FileKvStore::open(&path)?;
        assert_eq!(reopened.get_bool("fwstage", "run_once")?, Some(true));
        assert!(!temp_dir.path().join("nvs.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_file_store_uncommitted_write_is_lost() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nvs.json");

        let mut store = FileKvStore::open(&path)?;
        store.set_bool("fwstage", "run_once", true)?;
        drop(store);

        let reopened = FileKvStore::open(&path)?;
        assert_eq!(reopened.get_bool("fwstage", "run_once")?, None);
        Ok(())
    }

    #[test]
    fn test_file_store_rejects_corrupt_document() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nvs.json");
        std::fs::write(&path, b"{ not json")?;

        assert!(matches!(
            FileKvStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
        Ok(())
    }

    #[test]
    fn test_non_boolean_value_fails_closed() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nvs.json");
        std::fs::write(&path, br#"{"fwstage": {"run_once": 1}}"#)?;

        let mut decision = BootDecisionStore::new(FileKvStore::open(&path)?);
        assert!(matches!(decision.peek(), Err(StoreError::Corrupt(_))));
        assert!(!decision.consume_and_clear());
        Ok(())
    }

    #[traced_test]
    #[test]
    fn test_unreadable_flag_is_logged() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nvs.json");
        std::fs::write(&path, br#"{"fwstage": {"run_once": "yes"}}"#)?;

        let mut decision = BootDecisionStore::new(FileKvStore::open(&path)?);
        assert!(!decision.consume_and_clear());
        assert!(logs_contain("treating as unset"));
        Ok(())
    }
}
