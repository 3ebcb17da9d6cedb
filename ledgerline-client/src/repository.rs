//! Per-entity accessors implementing the resilient read and write flows.
//!
//! Reads: remote (with retry) merged with local-only records; on access
//! denial the local store alone; on any other failure the TTL cache merged
//! with local records. Writes: remote first; on access denial a locally
//! synthesized record.
//!
//! Every list, get, create and update runs on its own task. A caller that
//! stops waiting does not cancel it, so its cache and local-store writes
//! still land.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerline_core::{
    apply_patch, is_local_id, merge, synthesize_local, to_object, ApiError, ApiResult, Entity,
    EntityType, ErrorKind, Identified,
};
use ledgerline_storage::LocalFallbackStore;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::DataContext;
use crate::error::{local_storage_error, record_error};
use crate::service::RemoteDataService;
use crate::transport::MultipartUpload;

/// Where a read result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Fresh remote rows (merged with local-only records)
    Remote,
    /// Cached remote rows written at `cached_at` (merged with local-only records)
    Cache { cached_at: DateTime<Utc> },
    /// Local fallback store only
    Local,
}

/// A read result together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Fetched<T> {
    fn new(data: T, source: DataSource) -> Self {
        Self { data, source }
    }

    pub fn is_degraded(&self) -> bool {
        self.source != DataSource::Remote
    }
}

/// Accessor for one entity type.
pub struct Repository<T> {
    ctx: Arc<DataContext>,
    local: LocalFallbackStore<T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            local: self.local.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(ctx: Arc<DataContext>, local: LocalFallbackStore<T>) -> Self {
        Self { ctx, local }
    }

    pub fn entity_type(&self) -> EntityType {
        T::entity_type()
    }

    pub fn local_store(&self) -> &LocalFallbackStore<T> {
        &self.local
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Merged view of every record.
    pub async fn list(&self) -> ApiResult<Vec<T>> {
        Ok(self.list_where(&[]).await?.data)
    }

    /// Records matching PostgREST-style `(column, "eq.value")` filters.
    ///
    /// Local records are filtered client-side; only `eq.` conditions are
    /// evaluated locally, others are left to the backend.
    pub async fn list_where(&self, filters: &[(String, String)]) -> ApiResult<Fetched<Vec<T>>> {
        let repo = self.clone();
        let filters = filters.to_vec();
        run_detached(async move { repo.fetch_list(&filters).await }).await
    }

    /// A single record by identity: remote, then local store, then cache.
    pub async fn get(&self, id: &str) -> ApiResult<Option<T>> {
        let repo = self.clone();
        let id = id.to_string();
        run_detached(async move { repo.fetch_one(&id).await }).await
    }

    async fn fetch_list(&self, filters: &[(String, String)]) -> ApiResult<Fetched<Vec<T>>> {
        let entity = T::entity_type();
        let cache_key = list_cache_key(entity, filters);
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("list {}", entity), move || remote.list(entity, filters))
                .await
        }
        .await;

        match result {
            Ok(rows) => {
                let remote_records = decode_rows::<T>(entity, rows.clone())?;
                self.ctx.cache().put(&cache_key, Value::Array(rows));
                let merged = merge(remote_records, self.local_matching(filters));
                Ok(Fetched::new(merged, DataSource::Remote))
            }
            Err(error) if error.triggers_fallback() => {
                self.ensure_fallback_allowed(&error)?;
                tracing::warn!(
                    entity = %entity,
                    code = %error.code,
                    access = ?error.access,
                    "Remote refused access; serving local records"
                );
                Ok(Fetched::new(self.local_matching(filters), DataSource::Local))
            }
            Err(error) => {
                let Some(cached) = self
                    .ctx
                    .cache()
                    .get_as::<Vec<T>>(&cache_key, self.ctx.cache_max_age())
                else {
                    return Err(error);
                };
                let cached_at = cached.cached_at();
                tracing::warn!(
                    entity = %entity,
                    kind = %error.kind,
                    staleness_ms = cached.staleness().as_millis() as u64,
                    "Remote unavailable; serving cached records"
                );
                let merged = merge(cached.into_value(), self.local_matching(filters));
                Ok(Fetched::new(merged, DataSource::Cache { cached_at }))
            }
        }
    }

    async fn fetch_one(&self, id: &str) -> ApiResult<Option<T>> {
        let entity = T::entity_type();
        let cache_key = get_cache_key(entity, id);
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("get {}", entity), move || remote.get(entity, id))
                .await
        }
        .await;

        match result {
            Ok(Some(row)) => {
                let record = decode_row::<T>(entity, row.clone())?;
                self.ctx.cache().put(&cache_key, row);
                Ok(Some(record))
            }
            Ok(None) => Ok(self.local.find_by_id(id)),
            Err(error) if error.triggers_fallback() => {
                self.ensure_fallback_allowed(&error)?;
                Ok(self.local.find_by_id(id))
            }
            Err(error) => {
                if let Some(record) = self.local.find_by_id(id) {
                    return Ok(Some(record));
                }
                match self.ctx.cache().get_as::<T>(&cache_key, self.ctx.cache_max_age()) {
                    Some(cached) => {
                        tracing::warn!(entity = %entity, id, kind = %error.kind, "Serving cached record");
                        Ok(Some(cached.into_value()))
                    }
                    None => Err(error),
                }
            }
        }
    }

    /// Local records the remote has not (yet) confirmed.
    ///
    /// Compared against the live remote list when reachable; otherwise every
    /// record carrying a client-generated identity.
    pub async fn local_only(&self) -> ApiResult<Vec<T>> {
        let entity = T::entity_type();
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("list {}", entity), move || remote.list(entity, &[]))
                .await
        }
        .await;

        match result {
            Ok(rows) => {
                let remote_records = decode_rows::<T>(entity, rows)?;
                Ok(self.local.local_only(&remote_records))
            }
            Err(error) => {
                tracing::debug!(entity = %entity, kind = %error.kind, "Remote list failed; using local identities");
                Ok(self
                    .local
                    .list()
                    .into_iter()
                    .filter(|record| is_local_id(record.id()))
                    .collect())
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a record remotely, or locally when the remote refuses access.
    pub async fn create<P: Serialize + ?Sized>(&self, payload: &P) -> ApiResult<T> {
        let fields = self.outgoing(payload)?;
        let repo = self.clone();
        run_detached(async move { repo.insert_or_synthesize(fields).await }).await
    }

    /// Update a record remotely, or patch the local copy on access denial.
    ///
    /// Records with a client-generated identity are never known remotely and
    /// are patched locally straight away.
    pub async fn update<P: Serialize + ?Sized>(&self, id: &str, patch: &P) -> ApiResult<T> {
        let fields = self.outgoing(patch)?;
        let repo = self.clone();
        let id = id.to_string();
        run_detached(async move { repo.patch(&id, fields).await }).await
    }

    async fn insert_or_synthesize(&self, fields: Map<String, Value>) -> ApiResult<T> {
        let entity = T::entity_type();
        let body = &fields;
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("create {}", entity), move || remote.insert(entity, body))
                .await
        }
        .await;

        match result {
            Ok(row) => {
                let record = decode_row::<T>(entity, row)?;
                self.remember(&record);
                Ok(record)
            }
            Err(error) if error.triggers_fallback() => {
                self.ensure_fallback_allowed(&error)?;
                let record: T = synthesize_local(&fields, Utc::now()).map_err(record_error)?;
                self.local.append(&record).map_err(local_storage_error)?;
                tracing::info!(
                    entity = %entity,
                    id = record.id(),
                    code = %error.code,
                    "Remote refused access; record created locally"
                );
                Ok(record)
            }
            Err(error) => Err(error),
        }
    }

    async fn patch(&self, id: &str, fields: Map<String, Value>) -> ApiResult<T> {
        let entity = T::entity_type();
        if is_local_id(id) {
            return self.patch_local(id, &fields);
        }
        let body = &fields;
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("update {}", entity), move || remote.update(entity, id, body))
                .await
        }
        .await;

        match result {
            Ok(row) => {
                let record = decode_row::<T>(entity, row)?;
                self.remember(&record);
                Ok(record)
            }
            Err(error) if error.triggers_fallback() => {
                self.ensure_fallback_allowed(&error)?;
                let updated = self.patch_local(id, &fields)?;
                tracing::info!(entity = %entity, id, "Remote refused access; local record updated");
                Ok(updated)
            }
            Err(error) => Err(error),
        }
    }

    /// Upload a binary object. There is no local fallback for file content.
    pub async fn upload(&self, bucket: &str, path: &str, file: &MultipartUpload) -> ApiResult<Value> {
        let result = async {
            let remote = self.remote()?;
            self.ctx
                .retry_policy()
                .run(&format!("upload {}/{}", bucket, path), move || remote.upload(bucket, path, file))
                .await
        }
        .await;

        match result {
            Err(error) if error.triggers_fallback() && !self.ctx.fallback_enabled() => {
                Err(fallback_disabled(&error))
            }
            other => other,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn remote(&self) -> ApiResult<&dyn RemoteDataService> {
        self.ctx.remote().ok_or_else(ApiError::not_configured)
    }

    fn ensure_fallback_allowed(&self, error: &ApiError) -> ApiResult<()> {
        if self.ctx.fallback_enabled() {
            Ok(())
        } else {
            Err(fallback_disabled(error))
        }
    }

    /// Payload as sent to the backend, with entity-specific normalization.
    fn outgoing<P: Serialize + ?Sized>(&self, payload: &P) -> ApiResult<Map<String, Value>> {
        let mut fields = to_object(payload).map_err(record_error)?;
        T::normalize_payload(&mut fields);
        Ok(fields)
    }

    /// Keep a remotely confirmed record in the local store.
    ///
    /// The remote already holds it, so a local write failure is only logged.
    fn remember(&self, record: &T) {
        if let Err(e) = self.local.append(record) {
            tracing::warn!(
                entity = %T::entity_type(),
                id = record.id(),
                error = %e,
                "Failed to keep remote record in local store"
            );
        }
    }

    fn patch_local(&self, id: &str, fields: &Map<String, Value>) -> ApiResult<T> {
        let existing = self.local.find_by_id(id).ok_or_else(|| {
            ApiError::new(
                ErrorKind::NotFound,
                format!("No local {} record with id {}", T::entity_type(), id),
            )
        })?;
        let updated: T = apply_patch(&existing, fields, Utc::now()).map_err(record_error)?;
        self.local.append(&updated).map_err(local_storage_error)?;
        Ok(updated)
    }

    fn local_matching(&self, filters: &[(String, String)]) -> Vec<T> {
        let records = self.local.list();
        if filters.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|record| matches_filters(record, filters))
            .collect()
    }
}

/// Run `operation` on its own task and wait for it.
///
/// Dropping the returned future detaches the task instead of cancelling it.
async fn run_detached<R, F>(operation: F) -> ApiResult<R>
where
    R: Send + 'static,
    F: Future<Output = ApiResult<R>> + Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ApiError::unknown(format!("Data-access task was cancelled: {}", e))
            .with_code("TASK_CANCELLED")),
    }
}

fn fallback_disabled(cause: &ApiError) -> ApiError {
    ApiError::backend_unavailable(ErrorKind::BackendUnavailable.default_message())
        .with_details(serde_json::json!({
            "cause_kind": cause.kind,
            "cause_code": cause.code,
        }))
}

fn list_cache_key(entity: EntityType, filters: &[(String, String)]) -> String {
    if filters.is_empty() {
        return format!("{}:list", entity);
    }
    let query: Vec<String> = filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}:list?{}", entity, query.join("&"))
}

fn get_cache_key(entity: EntityType, id: &str) -> String {
    format!("{}:get:{}", entity, id)
}

fn decode_row<T: Entity>(entity: EntityType, row: Value) -> ApiResult<T> {
    serde_json::from_value(row).map_err(|e| {
        ApiError::unknown(format!("Unexpected {} row from the backend: {}", entity, e)).with_code("DECODE")
    })
}

fn decode_rows<T: Entity>(entity: EntityType, rows: Vec<Value>) -> ApiResult<Vec<T>> {
    rows.into_iter().map(|row| decode_row(entity, row)).collect()
}

/// Client-side evaluation of `eq.` filters; other operators always match.
fn matches_filters<T: Serialize>(record: &T, filters: &[(String, String)]) -> bool {
    let Ok(fields) = to_object(record) else {
        return false;
    };
    filters.iter().all(|(column, condition)| {
        let Some(expected) = condition.strip_prefix("eq.") else {
            return true;
        };
        match fields.get(column) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Null) | None => expected == "null",
            Some(other) => other.to_string() == expected,
        }
    })
}
