use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::analytics::knowledge::LearningDataExport;
use crate::analytics::modeling::{BehaviorLog, FeatureVector, LearnerProfile, StatePredictor};
use crate::analytics::scheduler::TrainingBuffer;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid snapshot key: {0}")]
    InvalidKey(String),
}

/// Everything needed to resume a learner after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerSnapshot {
    pub learner_id: String,
    pub saved_at: DateTime<Utc>,
    pub knowledge: LearningDataExport,
    pub predictor: StatePredictor,
    pub training_buffer: TrainingBuffer,
    pub profile: LearnerProfile,
    #[serde(default)]
    pub behavior: Option<BehaviorLog>,
    #[serde(default)]
    pub last_features: Option<FeatureVector>,
}

impl LearnerSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Opaque blob sink. Implementations are synchronous; async callers run them on
/// the blocking pool.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Moves an unreadable blob out of the way so `load` reports it absent
    /// while the bytes stay available for inspection.
    fn quarantine(&self, key: &str) -> Result<(), StoreError>;
}

/// Longest encoded key that still leaves room for the file suffixes.
const MAX_ENCODED_KEY_LEN: usize = 200;

/// Percent-encodes everything outside `[A-Za-z0-9_-]`, so any learner id maps
/// to exactly one plain file name.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// One JSON file per key under a root directory. Writes go through a temp file
/// and a rename so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let encoded = encode_key(key);
        if encoded.is_empty() || encoded.len() > MAX_ENCODED_KEY_LEN {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{encoded}.json")))
    }
}

impl SnapshotStore for FileStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(key, bytes = blob.len(), "snapshot written");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn quarantine(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let aside = path.with_extension(format!("json.corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")));
        match fs::rename(&path, &aside) {
            Ok(()) => {
                tracing::warn!(key, aside = %aside.display(), "unreadable snapshot moved aside");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    quarantined: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    pub fn quarantined(&self, key: &str) -> Option<Vec<u8>> {
        self.quarantined.lock().get(key).cloned()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.blobs.lock().insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    fn quarantine(&self, key: &str) -> Result<(), StoreError> {
        if let Some(blob) = self.blobs.lock().remove(key) {
            self.quarantined.lock().insert(key.to_string(), blob);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.load("learner-1").unwrap().is_none());

        store.save("learner-1", b"{\"a\":1}").unwrap();
        assert_eq!(store.load("learner-1").unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert!(!dir.path().join("learner-1.json.tmp").exists());

        store.save("learner-1", b"{}").unwrap();
        assert_eq!(store.load("learner-1").unwrap().as_deref(), Some(&b"{}"[..]));

        store.remove("learner-1").unwrap();
        assert!(store.load("learner-1").unwrap().is_none());
        store.remove("learner-1").unwrap();
    }

    #[test]
    fn file_store_encodes_arbitrary_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.save("ana.lima@example.com", b"1").unwrap();
        store.save("ana lima", b"2").unwrap();
        store.save("../escape", b"3").unwrap();
        store.save("学生", b"4").unwrap();

        assert_eq!(store.load("ana.lima@example.com").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.load("ana lima").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.load("../escape").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.load("学生").unwrap(), Some(b"4".to_vec()));
        assert!(dir.path().join("ana%2Elima%40example%2Ecom.json").exists());
        assert!(dir.path().join("%2E%2E%2Fescape.json").exists());
        assert!(!dir.path().parent().unwrap().join("escape.json").exists());
        // the escape byte itself is encoded, so distinct ids never share a file
        assert_eq!(store.load("ana%2Elima%40example%2Ecom").unwrap(), None);
    }

    #[test]
    fn file_store_rejects_empty_and_oversized_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(store.load(""), Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.save(&"@".repeat(100), b"x"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn file_store_quarantine_moves_blob_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("learner-1", b"not json").unwrap();

        store.quarantine("learner-1").unwrap();
        assert!(store.load("learner-1").unwrap().is_none());
        let aside: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with("learner-1.json.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read(dir.path().join(&aside[0])).unwrap(), b"not json");

        store.quarantine("learner-1").unwrap();
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save("a", b"1").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("a").unwrap(), Some(b"1".to_vec()));
        store.remove("a").unwrap();
        assert!(store.is_empty());

        store.save("b", b"bad").unwrap();
        store.quarantine("b").unwrap();
        assert!(store.load("b").unwrap().is_none());
        assert_eq!(store.quarantined("b"), Some(b"bad".to_vec()));
    }
}
