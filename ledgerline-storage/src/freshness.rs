//! Staleness metadata for cache reads, plus cache and store counters.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Result of a cache read, carrying staleness metadata.
///
/// A cached value is only ever served as a fallback, so callers get to see
/// how old it is.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    read_at: DateTime<Utc>,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, cached_at: DateTime<Utc>, read_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            read_at,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When this value was written to the cache.
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Age of the value at the moment it was read.
    pub fn staleness(&self) -> Duration {
        age(self.cached_at, self.read_at)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            read_at: self.read_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Elapsed time between two instants, clamped at zero.
pub(crate) fn age(written_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(written_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that returned a usable entry.
    pub hits: u64,
    /// Number of reads with no entry.
    pub misses: u64,
    /// Number of entries evicted because they were too old.
    pub expirations: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.expirations;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Counters for storage problems that were degraded rather than surfaced.
///
/// Shared by the cache and every fallback partition so operators can see
/// when corrupt storage was treated as empty.
#[derive(Debug, Default)]
pub struct StoreDiagnostics {
    corrupt_documents: AtomicU64,
    undecodable_records: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`StoreDiagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub corrupt_documents: u64,
    pub undecodable_records: u64,
    pub write_failures: u64,
}

impl StoreDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_corrupt_document(&self, key: &str, error: &dyn std::fmt::Display) {
        self.corrupt_documents.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "ledgerline::diagnostics",
            key,
            error = %error,
            "Corrupt storage document treated as empty"
        );
    }

    pub(crate) fn record_undecodable(&self, key: &str, error: &dyn std::fmt::Display) {
        self.undecodable_records.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "ledgerline::diagnostics",
            key,
            error = %error,
            "Stored record could not be decoded and was skipped"
        );
    }

    pub(crate) fn record_write_failure(&self, key: &str, error: &dyn std::fmt::Display) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "ledgerline::diagnostics",
            key,
            error = %error,
            "Failed to persist storage document"
        );
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            corrupt_documents: self.corrupt_documents.load(Ordering::Relaxed),
            undecodable_records: self.undecodable_records.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
