//! Ledgerline Storage - Client-Local Persistence
//!
//! Durable key-value storage plus the two stores built on it: the TTL cache of
//! successful remote results and the local fallback store of records held on
//! this client. Corrupt or unreadable storage degrades to "empty" and is
//! counted in [`StoreDiagnostics`]; failed fallback writes are surfaced.

pub mod backend;
pub mod fallback;
pub mod freshness;
pub mod ttl_cache;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use fallback::{fallback_key, FallbackPartitions, LocalFallbackStore};
pub use freshness::{CacheRead, CacheStats, DiagnosticsSnapshot, StoreDiagnostics};
pub use ttl_cache::{TtlCache, CACHE_STORAGE_KEY};

// ============================================================================
// ERRORS
// ============================================================================

/// Storage-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}
