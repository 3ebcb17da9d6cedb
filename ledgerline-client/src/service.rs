//! Abstract remote data service and its REST implementation.

use async_trait::async_trait;
use ledgerline_core::{ApiError, ApiResult, EntityType, ErrorKind};
use serde_json::{Map, Value};

use crate::transport::{into_rows, MultipartUpload, RequestOptions, Transport};

/// Row-level operations against the remote backend.
///
/// Implementations make exactly one attempt per call; retry, caching and
/// fallback are layered on top by the repository.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Every row of `entity` matching the `(column, "op.value")` filters.
    async fn list(&self, entity: EntityType, filters: &[(String, String)]) -> ApiResult<Vec<Value>>;

    /// The row with identity `id`, if the backend has it.
    async fn get(&self, entity: EntityType, id: &str) -> ApiResult<Option<Value>>;

    /// Insert a row and return it as stored.
    async fn insert(&self, entity: EntityType, payload: &Map<String, Value>) -> ApiResult<Value>;

    /// Apply `patch` to row `id` and return the updated row.
    async fn update(&self, entity: EntityType, id: &str, patch: &Map<String, Value>) -> ApiResult<Value>;

    /// Store a binary object under `bucket/path`.
    async fn upload(&self, bucket: &str, path: &str, file: &MultipartUpload) -> ApiResult<Value>;
}

/// [`RemoteDataService`] over a PostgREST-style HTTP API.
#[derive(Clone)]
pub struct HttpDataService {
    transport: Transport,
}

const REST_PREFIX: &str = "rest/v1";
const STORAGE_PREFIX: &str = "storage/v1/object";

impl HttpDataService {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn table_endpoint(entity: EntityType) -> String {
        format!("{}/{}", REST_PREFIX, entity.table())
    }
}

fn single_row(entity: EntityType, rows: Vec<Value>) -> ApiResult<Value> {
    rows.into_iter().next().ok_or_else(|| {
        ApiError::new(
            ErrorKind::NotFound,
            format!("The backend returned no {} row", entity),
        )
    })
}

#[async_trait]
impl RemoteDataService for HttpDataService {
    async fn list(&self, entity: EntityType, filters: &[(String, String)]) -> ApiResult<Vec<Value>> {
        let mut options = RequestOptions::get().query("select", "*");
        for (column, condition) in filters {
            options = options.query(column.clone(), condition.clone());
        }
        let response = self
            .transport
            .execute(&Self::table_endpoint(entity), &options)
            .await?;
        into_rows(response.body)
    }

    async fn get(&self, entity: EntityType, id: &str) -> ApiResult<Option<Value>> {
        let options = RequestOptions::get()
            .query("select", "*")
            .query("id", format!("eq.{}", id));
        let response = self
            .transport
            .execute(&Self::table_endpoint(entity), &options)
            .await?;
        Ok(into_rows(response.body)?.into_iter().next())
    }

    async fn insert(&self, entity: EntityType, payload: &Map<String, Value>) -> ApiResult<Value> {
        let options = RequestOptions::post_json(Value::Object(payload.clone()))
            .header("Prefer", "return=representation");
        let response = self
            .transport
            .execute(&Self::table_endpoint(entity), &options)
            .await?;
        single_row(entity, into_rows(response.body)?)
    }

    async fn update(&self, entity: EntityType, id: &str, patch: &Map<String, Value>) -> ApiResult<Value> {
        let options = RequestOptions::patch_json(Value::Object(patch.clone()))
            .query("id", format!("eq.{}", id))
            .header("Prefer", "return=representation");
        let response = self
            .transport
            .execute(&Self::table_endpoint(entity), &options)
            .await?;
        single_row(entity, into_rows(response.body)?)
    }

    async fn upload(&self, bucket: &str, path: &str, file: &MultipartUpload) -> ApiResult<Value> {
        let endpoint = format!(
            "{}/{}/{}",
            STORAGE_PREFIX,
            bucket.trim_matches('/'),
            path.trim_start_matches('/')
        );
        let response = self
            .transport
            .execute(&endpoint, &RequestOptions::upload(file.clone()))
            .await?;
        Ok(response.body.into_json())
    }
}
