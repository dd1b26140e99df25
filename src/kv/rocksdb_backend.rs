//! RocksDB-backed `KvBackend`. A single column family (`default`) holds raw
//! bytes; versioning is tracked inline via a small bincode header rather than
//! a second column family, since the adapter layer is the only consumer of
//! versions and a header round-trip is cheap at this scale.

use std::path::PathBuf;
use std::sync::RwLock;

use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

use super::{KvBackend, StoredEntry};

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u64,
    expires_at: Option<u64>,
    bytes: Vec<u8>,
}

pub struct RocksDbBackend {
    db: RwLock<DB>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl RocksDbBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path).map_err(|e| AppError::internal(e.to_string()))?;
        Ok(Self { db: RwLock::new(db), path })
    }

    fn read_envelope(&self, key: &str) -> Result<Option<Envelope>, AppError> {
        let db = self.db.read().map_err(|_| AppError::internal("rocksdb lock poisoned"))?;
        let raw = db
            .get(key.as_bytes())
            .map_err(|e| AppError::internal(e.to_string()))?;
        match raw {
            Some(bytes) => {
                let (envelope, _): (Envelope, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| AppError::internal(e.to_string()))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}

impl KvBackend for RocksDbBackend {
    fn raw_get(&self, key: &str) -> Result<Option<StoredEntry>, AppError> {
        Ok(self.read_envelope(key)?.map(|e| StoredEntry {
            bytes: e.bytes,
            version: e.version,
            expires_at: e.expires_at,
        }))
    }

    fn raw_put(&self, key: &str, bytes: Vec<u8>, ttl_secs: Option<u64>) -> Result<u64, AppError> {
        let current_version = self.read_envelope(key)?.map(|e| e.version).unwrap_or(0);
        let version = current_version + 1;
        let expires_at = ttl_secs.map(|t| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
                + t
        });
        let envelope = Envelope { version, expires_at, bytes };
        let encoded = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(|e| AppError::internal(e.to_string()))?;
        let db = self.db.write().map_err(|_| AppError::internal("rocksdb lock poisoned"))?;
        db.put(key.as_bytes(), encoded)
            .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(version)
    }

    fn raw_cas(
        &self,
        key: &str,
        expected_version: u64,
        bytes: Vec<u8>,
        ttl_secs: Option<u64>,
    ) -> Result<bool, AppError> {
        let db = self.db.write().map_err(|_| AppError::internal("rocksdb lock poisoned"))?;
        let current_version = match db.get(key.as_bytes()).map_err(|e| AppError::internal(e.to_string()))? {
            Some(raw) => {
                let (envelope, _): (Envelope, usize) =
                    bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                        .map_err(|e| AppError::internal(e.to_string()))?;
                envelope.version
            }
            None => 0,
        };
        if current_version != expected_version {
            return Ok(false);
        }
        let expires_at = ttl_secs.map(|t| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
                + t
        });
        let envelope = Envelope { version: expected_version + 1, expires_at, bytes };
        let encoded = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(|e| AppError::internal(e.to_string()))?;
        db.put(key.as_bytes(), encoded)
            .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(true)
    }

    fn raw_delete(&self, key: &str) -> Result<(), AppError> {
        let db = self.db.write().map_err(|_| AppError::internal("rocksdb lock poisoned"))?;
        db.delete(key.as_bytes()).map_err(|e| AppError::internal(e.to_string()))?;
        Ok(())
    }

    fn raw_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, StoredEntry)>, AppError> {
        let db = self.db.read().map_err(|_| AppError::internal("rocksdb lock poisoned"))?;
        let iter = db.prefix_iterator(prefix.as_bytes());
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| AppError::internal(e.to_string()))?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            if !key_str.starts_with(prefix) {
                break;
            }
            let (envelope, _): (Envelope, usize) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| AppError::internal(e.to_string()))?;
            out.push((
                key_str,
                StoredEntry {
                    bytes: envelope.bytes,
                    version: envelope.version,
                    expires_at: envelope.expires_at,
                },
            ));
        }
        Ok(out)
    }
}
