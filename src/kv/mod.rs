//! Generic KV store adapter (C1): a typed get/set/scan/TTL surface over an
//! opaque backend. The orchestrator state — task records, conversation
//! history, the code graph, skill usage counters, progress logs — all flow
//! through this one adapter so the backend (RocksDB here, an in-memory fake
//! in tests) can be swapped without touching call sites.

mod rocksdb_backend;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{AppError, ErrorCategory};

pub use rocksdb_backend::RocksDbBackend;

/// Namespace byte prefix separator. Keys are stored as `"{namespace}:{key}"`.
const NS_SEP: char = ':';

/// A versioned, optionally-expiring value as stored by the backend.
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub(crate) bytes: Vec<u8>,
    pub(crate) version: u64,
    pub(crate) expires_at: Option<u64>,
}

/// Backend trait the adapter is generic over. Implementations only need to
/// deal in raw bytes and versions; typed (de)serialization lives in `KvStore`.
pub trait KvBackend: Send + Sync {
    fn raw_get(&self, key: &str) -> Result<Option<StoredEntry>, AppError>;
    fn raw_put(&self, key: &str, bytes: Vec<u8>, ttl_secs: Option<u64>) -> Result<u64, AppError>;
    /// Compare-and-swap: succeeds only if the stored version matches `expected_version`.
    fn raw_cas(
        &self,
        key: &str,
        expected_version: u64,
        bytes: Vec<u8>,
        ttl_secs: Option<u64>,
    ) -> Result<bool, AppError>;
    fn raw_delete(&self, key: &str) -> Result<(), AppError>;
    fn raw_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredEntry)>, AppError>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_expired(entry: &StoredEntry) -> bool {
    matches!(entry.expires_at, Some(exp) if exp <= now_secs())
}

/// In-memory backend for tests and the fast-path single-process case.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn raw_get(&self, key: &str) -> Result<Option<StoredEntry>, AppError> {
        let data = self.data.lock().map_err(|_| AppError::internal("kv lock poisoned"))?;
        Ok(data.get(key).cloned().filter(|e| !is_expired(e)))
    }

    fn raw_put(&self, key: &str, bytes: Vec<u8>, ttl_secs: Option<u64>) -> Result<u64, AppError> {
        let mut data = self.data.lock().map_err(|_| AppError::internal("kv lock poisoned"))?;
        let version = data.get(key).map(|e| e.version + 1).unwrap_or(1);
        let expires_at = ttl_secs.map(|t| now_secs() + t);
        data.insert(key.to_string(), StoredEntry { bytes, version, expires_at });
        Ok(version)
    }

    fn raw_cas(
        &self,
        key: &str,
        expected_version: u64,
        bytes: Vec<u8>,
        ttl_secs: Option<u64>,
    ) -> Result<bool, AppError> {
        let mut data = self.data.lock().map_err(|_| AppError::internal("kv lock poisoned"))?;
        let current_version = data.get(key).map(|e| e.version).unwrap_or(0);
        if current_version != expected_version {
            return Ok(false);
        }
        let expires_at = ttl_secs.map(|t| now_secs() + t);
        data.insert(
            key.to_string(),
            StoredEntry { bytes, version: expected_version + 1, expires_at },
        );
        Ok(true)
    }

    fn raw_delete(&self, key: &str) -> Result<(), AppError> {
        let mut data = self.data.lock().map_err(|_| AppError::internal("kv lock poisoned"))?;
        data.remove(key);
        Ok(())
    }

    fn raw_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredEntry)>, AppError> {
        let data = self.data.lock().map_err(|_| AppError::internal("kv lock poisoned"))?;
        Ok(data
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !is_expired(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Typed, namespaced handle onto a `KvBackend`.
///
/// Cloning is cheap (`Arc` to the backend); every component (progress log,
/// code graph, skill registry, context compressor) holds its own `KvStore`
/// scoped to its own namespace.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    namespace: String,
}

impl KvStore {
    pub fn new(backend: Arc<dyn KvBackend>, namespace: impl Into<String>) -> Self {
        Self { backend, namespace: namespace.into() }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{NS_SEP}{}", self.namespace, key)
    }

    /// Get and deserialize a value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.backend.raw_get(&self.full_key(key))? {
            Some(entry) => {
                let value = serde_json::from_slice(&entry.bytes)
                    .map_err(|e| AppError::new(e.to_string(), ErrorCategory::Internal))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a value, optionally with a TTL in seconds.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> Result<(), AppError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.raw_put(&self.full_key(key), bytes, ttl_secs)?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), AppError> {
        self.backend.raw_delete(&self.full_key(key))
    }

    /// Scan all keys (namespace-relative) under a prefix, deserializing each value.
    pub fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>, AppError> {
        let full_prefix = self.full_key(prefix);
        let entries = self.backend.raw_scan_prefix(&full_prefix)?;
        let ns_prefix_len = self.namespace.len() + 1;
        let mut out = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            let value: T = serde_json::from_slice(&entry.bytes)
                .map_err(|e| AppError::new(e.to_string(), ErrorCategory::Internal))?;
            out.push((key[ns_prefix_len..].to_string(), value));
        }
        Ok(out)
    }

    /// Read the current value (and its version) for an optimistic-locking update.
    pub fn watch<T: DeserializeOwned>(&self, key: &str) -> Result<(Option<T>, u64), AppError> {
        match self.backend.raw_get(&self.full_key(key))? {
            Some(entry) => {
                let value = serde_json::from_slice(&entry.bytes)
                    .map_err(|e| AppError::new(e.to_string(), ErrorCategory::Internal))?;
                Ok((Some(value), entry.version))
            }
            None => Ok((None, 0)),
        }
    }

    /// Write a value only if the stored version still matches `expected_version`.
    /// Returns `false` on conflict (caller should re-`watch` and retry).
    pub fn write_if_unchanged<T: Serialize>(
        &self,
        key: &str,
        expected_version: u64,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<bool, AppError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.raw_cas(&self.full_key(key), expected_version, bytes, ttl_secs)
    }

    /// Retry a read-modify-write loop against `write_if_unchanged` up to `max_attempts`
    /// times, matching the orchestrator's Redis WATCH/MULTI retry pattern.
    pub fn update_with_retry<T, F>(
        &self,
        key: &str,
        max_attempts: usize,
        mut f: F,
    ) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnMut(Option<T>) -> T,
    {
        for attempt in 0..max_attempts {
            let (current, version) = self.watch::<T>(key)?;
            let updated = f(current);
            if self.write_if_unchanged(key, version, &updated, None)? {
                return Ok(updated);
            }
            tracing::debug!(key, attempt, "kv update conflict, retrying");
        }
        Err(AppError::internal(format!(
            "failed to update key {key} after {max_attempts} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug, Clone)]
    struct Counter {
        value: u32,
    }

    fn store() -> KvStore {
        KvStore::new(Arc::new(MemoryBackend::new()), "test")
    }

    #[test]
    fn round_trips_a_value() {
        let kv = store();
        kv.set("a", &Counter { value: 1 }, None).unwrap();
        let got: Counter = kv.get("a").unwrap().unwrap();
        assert_eq!(got, Counter { value: 1 });
    }

    #[test]
    fn scan_is_namespace_and_prefix_scoped() {
        let kv = store();
        kv.set("task:1", &Counter { value: 1 }, None).unwrap();
        kv.set("task:2", &Counter { value: 2 }, None).unwrap();
        kv.set("other:1", &Counter { value: 9 }, None).unwrap();
        let results: Vec<(String, Counter)> = kv.scan("task:").unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn write_if_unchanged_rejects_stale_version() {
        let kv = store();
        kv.set("k", &Counter { value: 1 }, None).unwrap();
        let (_, version) = kv.watch::<Counter>("k").unwrap();
        // Someone else writes first.
        kv.set("k", &Counter { value: 2 }, None).unwrap();
        let ok = kv.write_if_unchanged("k", version, &Counter { value: 3 }, None).unwrap();
        assert!(!ok);
    }

    #[test]
    fn update_with_retry_converges() {
        let kv = store();
        let result: Counter = kv
            .update_with_retry("counter", 5, |current| {
                let mut c = current.unwrap_or_default();
                c.value += 1;
                c
            })
            .unwrap();
        assert_eq!(result.value, 1);
    }

    #[test]
    fn ttl_expiry_hides_value() {
        let kv = store();
        kv.set("short", &Counter { value: 1 }, Some(0)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let got: Option<Counter> = kv.get("short").unwrap();
        assert!(got.is_none());
    }
}
