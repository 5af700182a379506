//! In-memory doubles for the storage ports, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use steward_types::error::RepositoryError;
use steward_types::memory::LongTermEntry;
use steward_types::retry::{DeadLetter, RetryOperation};
use tokio::time::Instant;
use uuid::Uuid;

use crate::memory::{ContentHasher, LongTermBackend, ShortTermBackend};
use crate::retry::RetryStore;

fn far_deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60))
}

/// Short-term double. Expiry follows the Tokio clock so tests can pause it.
#[derive(Default)]
pub struct MapCache {
    pub entries: Mutex<HashMap<String, (Value, Instant)>>,
    pub down: AtomicBool,
}

impl MapCache {
    fn check(&self) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }
}

impl ShortTermBackend for MapCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        self.check()?;
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), RepositoryError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.clone(), far_deadline(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check()
    }
}

/// Long-term double. Vec order is insertion order, oldest first.
#[derive(Default)]
pub struct VecStore {
    pub entries: Mutex<Vec<LongTermEntry>>,
    pub down: AtomicBool,
}

impl VecStore {
    fn check(&self) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }

    pub fn keys(&self, namespace: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.namespace == namespace)
            .map(|e| e.key.clone())
            .collect()
    }
}

impl LongTermBackend for VecStore {
    async fn fingerprint_exists(&self, namespace: &str, fingerprint: &str) -> Result<bool, RepositoryError> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.namespace == namespace && e.fingerprint == fingerprint))
    }

    async fn count(&self, namespace: &str) -> Result<u64, RepositoryError> {
        self.check()?;
        Ok(self.keys(namespace).len() as u64)
    }

    async fn evict_oldest(&self, namespace: &str, count: u64) -> Result<u64, RepositoryError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let mut evicted = 0;
        entries.retain(|e| {
            if e.namespace == namespace && evicted < count {
                evicted += 1;
                false
            } else {
                true
            }
        });
        Ok(evicted)
    }

    async fn upsert(&self, entry: &LongTermEntry) -> Result<(), RepositoryError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| {
            e.namespace == entry.namespace
                && e.memory_type == entry.memory_type
                && e.storage_key == entry.storage_key
        }) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn latest_by_key(&self, namespace: &str, key: &str) -> Result<Option<LongTermEntry>, RepositoryError> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.namespace == namespace && e.key == key)
            .cloned())
    }

    async fn search(&self, namespace: &str, memory_type: &str, limit: u32) -> Result<Vec<LongTermEntry>, RepositoryError> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.namespace == namespace && e.memory_type == memory_type)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check()
    }
}

/// Reversible "hash" so fingerprints stay readable in assertions.
pub struct HexHasher;

impl ContentHasher for HexHasher {
    fn compute_hash(&self, content: &str) -> String {
        content.bytes().map(|b| format!("{b:02x}")).collect()
    }

    fn version_tag(&self) -> &str {
        "t0"
    }
}

/// Retry store double; clones share state so tests can inspect it.
#[derive(Clone, Default)]
pub struct MemoryRetryStore {
    pub active: Arc<Mutex<HashMap<Uuid, RetryOperation>>>,
    pub dead: Arc<Mutex<Vec<DeadLetter>>>,
    pub fail_saves: Arc<AtomicBool>,
    pub fail_dead_letters: Arc<AtomicBool>,
}

impl MemoryRetryStore {
    pub fn stored(&self) -> Vec<RetryOperation> {
        self.active.lock().unwrap().values().cloned().collect()
    }
}

impl RetryStore for MemoryRetryStore {
    async fn save(&self, operation: &RetryOperation) -> Result<(), RepositoryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Io("disk full".to_string()));
        }
        self.active
            .lock()
            .unwrap()
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn remove(&self, id: &Uuid) -> Result<(), RepositoryError> {
        self.active.lock().unwrap().remove(id);
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<RetryOperation>, RepositoryError> {
        Ok(self.stored())
    }

    async fn write_dead_letter(&self, letter: &DeadLetter) -> Result<(), RepositoryError> {
        if self.fail_dead_letters.load(Ordering::SeqCst) {
            return Err(RepositoryError::Io("disk full".to_string()));
        }
        self.dead.lock().unwrap().push(letter.clone());
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, RepositoryError> {
        Ok(self.dead.lock().unwrap().clone())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

