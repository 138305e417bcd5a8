//! Keyed snapshot caches (`id_trie`, `net_trie`).
//!
//! Values are the last JSON snapshot observed for a key. Network members are
//! stored under the compound key `network_id ++ node_id`, so the members of
//! one network are found by prefix.

use crate::error::{Error, Result};
use rocksdb::{Options, DB};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A keyed store of JSON snapshots with prefix enumeration.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key. Returns true if it was present.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, in key order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn keys(&self) -> Result<Vec<String>> {
        self.keys_with_prefix("")
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}

const ID_PREFIX: &str = "id:";
const NET_PREFIX: &str = "net:";

/// Both caches in one RocksDB directory, separated by key prefix.
pub struct TrieDb {
    db: Arc<DB>,
}

impl TrieDb {
    /// Open or create the cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Node ID -> identity snapshot.
    pub fn id_trie(&self) -> RocksTrie {
        RocksTrie {
            db: Arc::clone(&self.db),
            prefix: ID_PREFIX,
        }
    }

    /// Network ID (and network ++ member) -> snapshot.
    pub fn net_trie(&self) -> RocksTrie {
        RocksTrie {
            db: Arc::clone(&self.db),
            prefix: NET_PREFIX,
        }
    }
}

/// One prefix-scoped view of a [`TrieDb`].
#[derive(Clone)]
pub struct RocksTrie {
    db: Arc<DB>,
    prefix: &'static str,
}

impl RocksTrie {
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl SnapshotStore for RocksTrie {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.db.get(self.full_key(key).as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.db.put(self.full_key(key).as_bytes(), data)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        let existed = self.db.get(full.as_bytes())?.is_some();
        if existed {
            self.db.delete(full.as_bytes())?;
        }
        Ok(existed)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();

        let iter = self.db.prefix_iterator(full_prefix.as_bytes());
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(full_prefix.as_bytes()) {
                break;
            }
            let key = std::str::from_utf8(&key)
                .map_err(|e| Error::Storage(format!("non-utf8 cache key: {}", e)))?;
            if let Some(k) = key.strip_prefix(self.prefix) {
                keys.push(k.to_string());
            }
        }

        Ok(keys)
    }
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemoryTrie {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryTrie {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("trie lock poisoned".into()))
    }
}

impl SnapshotStore for MemoryTrie {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
