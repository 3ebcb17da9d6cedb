//! Local fallback store for records originated or seen while the remote
//! service was unavailable or refused the caller.
//!
//! Each entity type owns one partition, persisted as a JSON array under its
//! own storage key. Unreadable storage reads as an empty list (with a
//! diagnostic), but a failed *write* is returned to the caller: a record the
//! user believes was saved must never disappear silently.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ledgerline_core::{Entity, EntityType, Identified};
use serde_json::Value;

use crate::backend::KeyValueStore;
use crate::freshness::StoreDiagnostics;
use crate::StorageError;

/// Storage key of the partition for `entity_type`.
pub fn fallback_key(entity_type: EntityType) -> String {
    format!("ledgerline.fallback.{}", entity_type.as_str())
}

/// Factory for fallback partitions sharing one backing store.
///
/// Hands out one mutex per entity type so every partition handle for the same
/// type serializes its read-modify-write cycles against the others.
pub struct FallbackPartitions {
    store: Arc<dyn KeyValueStore>,
    diagnostics: Arc<StoreDiagnostics>,
    locks: Mutex<HashMap<EntityType, Arc<Mutex<()>>>>,
}

impl FallbackPartitions {
    pub fn new(store: Arc<dyn KeyValueStore>, diagnostics: Arc<StoreDiagnostics>) -> Self {
        Self {
            store,
            diagnostics,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the partition for `T`.
    pub fn partition<T: Entity>(&self) -> Result<LocalFallbackStore<T>, StorageError> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| StorageError::LockPoisoned)?;
            locks.entry(T::entity_type()).or_default().clone()
        };
        Ok(LocalFallbackStore {
            store: Arc::clone(&self.store),
            diagnostics: Arc::clone(&self.diagnostics),
            key: fallback_key(T::entity_type()),
            lock,
            _marker: PhantomData,
        })
    }

    pub fn diagnostics(&self) -> &StoreDiagnostics {
        &self.diagnostics
    }
}

/// Persisted list of locally-held records of one entity type.
pub struct LocalFallbackStore<T> {
    store: Arc<dyn KeyValueStore>,
    diagnostics: Arc<StoreDiagnostics>,
    key: String,
    lock: Arc<Mutex<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for LocalFallbackStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            diagnostics: Arc::clone(&self.diagnostics),
            key: self.key.clone(),
            lock: Arc::clone(&self.lock),
            _marker: PhantomData,
        }
    }
}

/// Raw partition contents plus whether the stored document was unreadable.
struct Loaded {
    rows: Vec<Value>,
    corrupt_raw: Option<String>,
}

impl<T: Entity> LocalFallbackStore<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Every decodable record, in insertion order.
    pub fn list(&self) -> Vec<T> {
        let Ok(_guard) = self.lock.lock() else {
            return Vec::new();
        };
        self.decode_all(self.load().rows)
    }

    /// Record with the given identity, if held locally.
    pub fn find_by_id(&self, id: &str) -> Option<T> {
        self.list().into_iter().find(|record| record.id() == id)
    }

    /// Insert `record`, replacing in place any record with the same identity.
    pub fn append(&self, record: &T) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut loaded = self.load();
        if let Some(raw) = loaded.corrupt_raw.take() {
            self.preserve_corrupt(&raw)?;
        }

        let encoded = serde_json::to_value(record)?;
        match loaded
            .rows
            .iter_mut()
            .find(|row| row_id(row).as_deref() == Some(record.id()))
        {
            Some(existing) => *existing = encoded,
            None => loaded.rows.push(encoded),
        }

        let raw = serde_json::to_string(&loaded.rows)?;
        self.store.write(&self.key, &raw).map_err(|e| {
            self.diagnostics.record_write_failure(&self.key, &e);
            e
        })
    }

    /// Records whose identity is absent from `remote`.
    pub fn local_only<R: Identified>(&self, remote: &[R]) -> Vec<T> {
        let remote_ids: HashSet<&str> = remote.iter().map(Identified::id).collect();
        self.list()
            .into_iter()
            .filter(|record| !remote_ids.contains(record.id()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self) -> Loaded {
        let raw = match self.store.read(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Loaded {
                    rows: Vec::new(),
                    corrupt_raw: None,
                }
            }
            Err(e) => {
                self.diagnostics.record_corrupt_document(&self.key, &e);
                return Loaded {
                    rows: Vec::new(),
                    corrupt_raw: None,
                };
            }
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(rows) => Loaded {
                rows,
                corrupt_raw: None,
            },
            Err(e) => {
                self.diagnostics.record_corrupt_document(&self.key, &e);
                Loaded {
                    rows: Vec::new(),
                    corrupt_raw: Some(raw),
                }
            }
        }
    }

    fn decode_all(&self, rows: Vec<Value>) -> Vec<T> {
        rows.into_iter()
            .filter_map(|row| match serde_json::from_value::<T>(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    self.diagnostics.record_undecodable(&self.key, &e);
                    None
                }
            })
            .collect()
    }

    /// Copy an unreadable document aside before it gets overwritten.
    fn preserve_corrupt(&self, raw: &str) -> Result<(), StorageError> {
        let backup_key = format!("{}.corrupt-{}", self.key, Utc::now().timestamp_millis());
        self.store.write(&backup_key, raw)?;
        tracing::warn!(
            target: "ledgerline::diagnostics",
            key = %self.key,
            backup_key = %backup_key,
            "Preserved corrupt fallback partition before rewriting it"
        );
        Ok(())
    }
}

/// Identity of a raw row (string or numeric `id`).
fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
