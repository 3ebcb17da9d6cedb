//! The shared data context every repository is built from.

use std::sync::Arc;
use std::time::Duration;

use ledgerline_core::{ApiResult, Entity};
use ledgerline_storage::{
    FallbackPartitions, FileStore, KeyValueStore, MemoryStore, StoreDiagnostics, TtlCache,
};

use crate::classify::ErrorClassifier;
use crate::config::{ClientConfig, StorageBackend};
use crate::error::{local_storage_error, ClientError};
use crate::repository::Repository;
use crate::retry::RetryPolicy;
use crate::service::{HttpDataService, RemoteDataService};
use crate::session::{LoginRedirect, SessionStore};
use crate::transport::{Transport, TransportSettings};

/// Default maximum age of a cached result served after a remote failure.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Remote service, stores and policy shared by all repositories.
///
/// Built once at startup and passed around behind an `Arc`.
pub struct DataContext {
    remote: Option<Arc<dyn RemoteDataService>>,
    store: Arc<dyn KeyValueStore>,
    cache: Arc<TtlCache>,
    fallback: FallbackPartitions,
    diagnostics: Arc<StoreDiagnostics>,
    session: SessionStore,
    retry: RetryPolicy,
    fallback_enabled: bool,
    cache_max_age: Duration,
}

impl DataContext {
    pub fn builder() -> DataContextBuilder {
        DataContextBuilder::default()
    }

    /// Wire everything from configuration.
    pub fn from_config(
        config: &ClientConfig,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Arc<Self>, ClientError> {
        let store: Arc<dyn KeyValueStore> = match (config.storage.backend, &config.storage.path) {
            (StorageBackend::File, Some(path)) => Arc::new(FileStore::open(path)?),
            (StorageBackend::File, None) => {
                return Err(ClientError::Usage(
                    "storage.path is required for the file backend".to_string(),
                ))
            }
            (StorageBackend::Memory, _) => Arc::new(MemoryStore::new()),
        };

        let mut builder = Self::builder()
            .store(Arc::clone(&store))
            .retry(config.retry.policy())
            .fallback_enabled(config.fallback.enabled)
            .cache_max_age(config.cache_max_age());

        if let Some(remote) = &config.remote {
            let settings = TransportSettings {
                base_url: remote.base_url.clone(),
                anon_key: remote.anon_key.clone(),
                request_timeout: config.request_timeout(),
                classifier: ErrorClassifier::new(remote.policy_codes.iter().cloned()),
            };
            let transport = Transport::new(settings, SessionStore::new(store), redirect)?;
            builder = builder.remote(Arc::new(HttpDataService::new(transport)));
        } else {
            tracing::info!("No remote configured; serving local data only");
        }
        Ok(Arc::new(builder.build()))
    }

    /// Repository for entity type `T`.
    pub fn repository<T: Entity>(self: &Arc<Self>) -> ApiResult<Repository<T>> {
        let local = self.fallback.partition::<T>().map_err(local_storage_error)?;
        Ok(Repository::new(Arc::clone(self), local))
    }

    pub fn remote(&self) -> Option<&dyn RemoteDataService> {
        self.remote.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn fallback(&self) -> &FallbackPartitions {
        &self.fallback
    }

    pub fn diagnostics(&self) -> &StoreDiagnostics {
        &self.diagnostics
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    pub fn cache_max_age(&self) -> Duration {
        self.cache_max_age
    }
}

/// Builder for [`DataContext`]; defaults to in-memory storage and no remote.
pub struct DataContextBuilder {
    remote: Option<Arc<dyn RemoteDataService>>,
    store: Option<Arc<dyn KeyValueStore>>,
    retry: RetryPolicy,
    fallback_enabled: bool,
    cache_max_age: Duration,
}

impl Default for DataContextBuilder {
    fn default() -> Self {
        Self {
            remote: None,
            store: None,
            retry: RetryPolicy::default(),
            fallback_enabled: true,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
        }
    }
}

impl DataContextBuilder {
    pub fn remote(mut self, remote: Arc<dyn RemoteDataService>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    pub fn build(self) -> DataContext {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let diagnostics = Arc::new(StoreDiagnostics::new());
        let cache = Arc::new(TtlCache::open(Arc::clone(&store), Arc::clone(&diagnostics)));
        let fallback = FallbackPartitions::new(Arc::clone(&store), Arc::clone(&diagnostics));
        DataContext {
            remote: self.remote,
            session: SessionStore::new(Arc::clone(&store)),
            store,
            cache,
            fallback,
            diagnostics,
            retry: self.retry,
            fallback_enabled: self.fallback_enabled,
            cache_max_age: self.cache_max_age,
        }
    }
}
