#![forbid(unsafe_code)]

//! JSON-file backed store.
//!
//! The whole store is one JSON document:
//!
//! ```json
//! { "version": 1, "entries": { "device-locations": { "array": [] } } }
//! ```
//!
//! Every `set`/`remove` re-reads the document, changes only its own key and
//! writes the result through a uniquely named sibling temp file followed by
//! a rename, so a crash never leaves a half-written file.
//! Other processes may edit the file; [`FileStore::reload`] diffs the disk
//! contents against the in-memory view and notifies observers of every key
//! that changed.
//!
//! # Invariants
//!
//! 1. A write never reverts another process's change to a different key.
//! 2. The in-memory view changes only after the document reached disk.
//!    A failed write leaves it untouched and notifies nobody.
//! 3. Keys found changed on disk during a write are notified like
//!    [`reload`](FileStore::reload) would notify them.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::observers::ObserverTable;
use super::{ChangeHandler, Observation, Store, StoreError, StoreId};
use crate::codec::PropertyValue;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, PropertyValue>,
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// Durable [`Store`] persisted as a JSON document.
pub struct FileStore {
    id: StoreId,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PropertyValue>>,
    write_gate: Mutex<()>,
    observers: ObserverTable,
}

impl FileStore {
    /// Open the store at `path`. A missing file yields an empty store; the
    /// file is created on the first write.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file exists but cannot be read,
    /// [`StoreError::Format`] if it is not a valid store document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = read_document(&path)?;
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            id: StoreId::next(),
            path,
            entries: Mutex::new(entries),
            write_gate: Mutex::new(()),
            observers: ObserverTable::new(),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live observers for `key`.
    #[must_use]
    pub fn observer_count(&self, key: &str) -> usize {
        self.observers.observer_count(key)
    }

    /// Re-read the backing file and notify observers of every key whose
    /// value differs from the in-memory view. Returns the number of changed
    /// keys.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open). The in-memory view is left untouched on
    /// error.
    pub fn reload(&self) -> Result<usize, StoreError> {
        let changes = {
            let _gate = self
                .write_gate
                .lock()
                .map_err(|_| StoreError::PoisonedLock)?;
            let on_disk = read_document(&self.path)?;
            let mut entries = self.entries.lock().map_err(|_| StoreError::PoisonedLock)?;
            let changes = diff(&entries, &on_disk);
            *entries = on_disk;
            changes
        };
        if !changes.is_empty() {
            tracing::debug!(path = %self.path.display(), changed = changes.len(), "file store reloaded");
        }
        self.notify_all(&changes);
        Ok(changes.len())
    }

    fn apply(&self, key: &str, value: Option<PropertyValue>) -> Result<(), StoreError> {
        let changes = {
            let _gate = self
                .write_gate
                .lock()
                .map_err(|_| StoreError::PoisonedLock)?;
            let next = write_key(&self.path, key, &value).inspect_err(|err| {
                tracing::warn!(path = %self.path.display(), key, error = %err, "file store write failed");
            })?;
            let mut entries = self.entries.lock().map_err(|_| StoreError::PoisonedLock)?;
            let changes = diff(&entries, &next);
            *entries = next;
            changes
        };
        let external = changes.iter().filter(|(k, _)| k != key).count();
        if external > 0 {
            tracing::debug!(path = %self.path.display(), changed = external, "picked up external edits while writing");
        }
        self.notify_all(&changes);
        Ok(())
    }

    fn notify_all(&self, changes: &[(String, Option<PropertyValue>)]) {
        for (key, value) in changes {
            self.observers.notify(key, value);
        }
    }
}

/// Keys whose value in `new` differs from `old`, with the new value.
fn diff(
    old: &BTreeMap<String, PropertyValue>,
    new: &BTreeMap<String, PropertyValue>,
) -> Vec<(String, Option<PropertyValue>)> {
    let mut changes = Vec::new();
    for (key, before) in old {
        match new.get(key) {
            Some(after) if after == before => {}
            other => changes.push((key.clone(), other.cloned())),
        }
    }
    for (key, after) in new {
        if !old.contains_key(key) {
            changes.push((key.clone(), Some(after.clone())));
        }
    }
    changes
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_document(path: &Path) -> Result<BTreeMap<String, PropertyValue>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(io_error(path, err)),
    };
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let doc: Document = serde_json::from_str(&text)?;
    if doc.version != DOCUMENT_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = doc.version,
            expected = DOCUMENT_VERSION,
            "store document version mismatch; reading entries anyway"
        );
    }
    Ok(doc.entries)
}

/// Re-read the document at `path`, change only `key` and write it back if
/// that changed anything. Returns the resulting entries.
fn write_key(
    path: &Path,
    key: &str,
    value: &Option<PropertyValue>,
) -> Result<BTreeMap<String, PropertyValue>, StoreError> {
    let mut entries = read_document(path)?;
    let previous = match value {
        Some(v) => entries.insert(key.to_owned(), v.clone()),
        None => entries.remove(key),
    };
    if previous != *value {
        write_document(path, &entries)?;
    }
    Ok(entries)
}

fn write_document(path: &Path, entries: &BTreeMap<String, PropertyValue>) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    let doc = Document {
        version: DOCUMENT_VERSION,
        entries: entries.clone(),
    };
    let text = serde_json::to_string_pretty(&doc)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

impl Store for FileStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn get(&self, key: &str) -> Option<PropertyValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: PropertyValue) -> Result<(), StoreError> {
        self.apply(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(key, None)
    }

    fn observe(&self, key: &str, handler: ChangeHandler) -> Observation {
        self.observers.register(key, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn watch(store: &FileStore, key: &str) -> (Observation, mpsc::Receiver<Option<PropertyValue>>) {
        let (tx, rx) = mpsc::channel();
        let obs = store.observe(
            key,
            Box::new(move |v| {
                let _ = tx.send(v);
            }),
        );
        (obs, rx)
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(store.get("anything"), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("name", "simloc".into()).unwrap();
            store.set("blob", PropertyValue::Data(vec![9, 8, 7])).unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("name"), Some(PropertyValue::from("simloc")));
        assert_eq!(reopened.get("blob"), Some(PropertyValue::Data(vec![9, 8, 7])));
    }

    #[test]
    fn remove_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = FileStore::open(&path).unwrap();
        store.set("k", true.into()).unwrap();
        store.remove("k").unwrap();
        assert_eq!(FileStore::open(&path).unwrap().get("k"), None);
    }

    #[test]
    fn malformed_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Format(_))));
    }

    #[test]
    fn empty_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "").unwrap();
        assert_eq!(FileStore::open(&path).unwrap().get("k"), None);
    }

    #[test]
    fn reload_notifies_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let ours = FileStore::open(&path).unwrap();
        ours.set("keep", 1_i64.into()).unwrap();
        ours.set("gone", 2_i64.into()).unwrap();
        let (_keep, keep_rx) = watch(&ours, "keep");
        let (_gone, gone_rx) = watch(&ours, "gone");
        let (_new, new_rx) = watch(&ours, "new");

        // Another process edits the same file.
        let theirs = FileStore::open(&path).unwrap();
        theirs.remove("gone").unwrap();
        theirs.set("new", "hello".into()).unwrap();

        assert_eq!(ours.reload().unwrap(), 2);
        assert!(keep_rx.try_recv().is_err());
        assert_eq!(gone_rx.try_recv().unwrap(), None);
        assert_eq!(new_rx.try_recv().unwrap(), Some(PropertyValue::from("hello")));
        assert_eq!(ours.get("new"), Some(PropertyValue::from("hello")));
    }

    #[test]
    fn write_keeps_other_process_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let ours = FileStore::open(&path).unwrap();
        ours.set("k", 1_i64.into()).unwrap();
        let (_k, k_rx) = watch(&ours, "k");

        let theirs = FileStore::open(&path).unwrap();
        theirs.set("k", 2_i64.into()).unwrap();

        ours.set("other", true.into()).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k"), Some(PropertyValue::Integer(2)));
        assert_eq!(reopened.get("other"), Some(PropertyValue::Bool(true)));

        // The edit picked up while writing reaches our observers too.
        assert_eq!(k_rx.try_recv().unwrap(), Some(PropertyValue::Integer(2)));
        assert_eq!(ours.get("k"), Some(PropertyValue::Integer(2)));
        assert_eq!(ours.reload().unwrap(), 0);
    }

    #[test]
    fn failed_write_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("prefs");
        fs::create_dir(&parent).unwrap();
        let broken = FileStore::open(parent.join("prefs.json")).unwrap();
        let (_obs, rx) = watch(&broken, "n");

        // Replace the parent directory with a regular file.
        fs::remove_dir(&parent).unwrap();
        fs::write(&parent, "").unwrap();

        assert!(matches!(broken.set("n", 7_i64.into()), Err(StoreError::Io { .. })));
        assert_eq!(broken.get("n"), None);
        assert!(rx.try_recv().is_err());
        assert!(matches!(broken.remove("n"), Err(StoreError::Io { .. })));
    }

    #[test]
    fn writes_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("prefs.json")).unwrap();
        for i in 0..5_i64 {
            store.set("n", i.into()).unwrap();
        }
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("prefs.json")]);
    }

    #[test]
    fn reload_without_changes_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("prefs.json")).unwrap();
        store.set("k", 1_i64.into()).unwrap();
        let (_obs, rx) = watch(&store, "k");
        assert_eq!(store.reload().unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn document_layout_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let store = FileStore::open(&path).unwrap();
        store.set("flag", true.into()).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["entries"]["flag"]["bool"], true);
    }
}
