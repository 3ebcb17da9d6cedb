//! Ledgerline Test Utilities
//!
//! Shared test infrastructure for the Ledgerline workspace:
//! - A scripted in-memory [`RemoteDataService`]
//! - Constructors for the classified failures the backend produces
//! - Fixtures for entities and data contexts
//! - Proptest generators

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub use ledgerline_client::{
    DataContext, DataContextBuilder, MultipartUpload, RemoteDataService, Repository, RetryPolicy,
};
pub use ledgerline_core::{
    AccessDenial, ApiError, ApiResult, Association, BackendStatus, Employee, EntityType, ErrorKind,
    PayrollRecord,
};
pub use ledgerline_storage::{KeyValueStore, MemoryStore};

// ============================================================================
// MOCK REMOTE
// ============================================================================

/// Remote operation a scripted response applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    List,
    Get,
    Insert,
    Update,
    Upload,
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<(MockOp, EntityType), VecDeque<ApiResult<Value>>>,
    uploads: VecDeque<ApiResult<Value>>,
    calls: HashMap<MockOp, u32>,
    payloads: Vec<(EntityType, Map<String, Value>)>,
}

/// In-memory [`RemoteDataService`] replaying scripted responses.
///
/// Responses queue per operation and entity type. When a queue runs dry the
/// last scripted response keeps being returned; an operation that was never
/// scripted answers with an empty success.
#[derive(Clone, Default)]
pub struct MockDataService {
    state: Arc<Mutex<MockState>>,
}

impl MockDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `op` on `entity`.
    pub fn push(&self, op: MockOp, entity: EntityType, response: ApiResult<Value>) -> &Self {
        let mut state = self.lock();
        state.scripted.entry((op, entity)).or_default().push_back(response);
        drop(state);
        self
    }

    /// Queue a successful list returning `rows`.
    pub fn push_rows(&self, entity: EntityType, rows: Vec<Value>) -> &Self {
        self.push(MockOp::List, entity, Ok(Value::Array(rows)))
    }

    /// Queue the same failure for every row operation on `entity`.
    pub fn fail_all(&self, entity: EntityType, error: ApiError) -> &Self {
        for op in [MockOp::List, MockOp::Get, MockOp::Insert, MockOp::Update] {
            self.push(op, entity, Err(error.clone()));
        }
        self
    }

    pub fn push_upload(&self, response: ApiResult<Value>) -> &Self {
        self.lock().uploads.push_back(response);
        self
    }

    /// Number of attempts made for `op` so far.
    pub fn calls(&self, op: MockOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Bodies received by insert and update, in order.
    pub fn payloads(&self) -> Vec<(EntityType, Map<String, Value>)> {
        self.lock().payloads.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self, op: MockOp, entity: EntityType, default: Value) -> ApiResult<Value> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        let Some(queue) = state.scripted.get_mut(&(op, entity)) else {
            return Ok(default);
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Ok(default))
        } else {
            queue.front().cloned().unwrap_or(Ok(default))
        }
    }

    fn record_payload(&self, entity: EntityType, payload: &Map<String, Value>) {
        self.lock().payloads.push((entity, payload.clone()));
    }
}

/// Echo a written payload back with a remote identity.
fn stored_row(payload: &Map<String, Value>, id: &str) -> Value {
    let mut row = payload.clone();
    row.entry("id").or_insert_with(|| Value::String(id.to_string()));
    Value::Object(row)
}

#[async_trait]
impl RemoteDataService for MockDataService {
    async fn list(&self, entity: EntityType, _filters: &[(String, String)]) -> ApiResult<Vec<Value>> {
        match self.next(MockOp::List, entity, Value::Array(Vec::new()))? {
            Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }

    async fn get(&self, entity: EntityType, _id: &str) -> ApiResult<Option<Value>> {
        match self.next(MockOp::Get, entity, Value::Null)? {
            Value::Null => Ok(None),
            row => Ok(Some(row)),
        }
    }

    async fn insert(&self, entity: EntityType, payload: &Map<String, Value>) -> ApiResult<Value> {
        self.record_payload(entity, payload);
        let default = stored_row(payload, "remote-1");
        self.next(MockOp::Insert, entity, default)
    }

    async fn update(&self, entity: EntityType, id: &str, patch: &Map<String, Value>) -> ApiResult<Value> {
        self.record_payload(entity, patch);
        let default = stored_row(patch, id);
        self.next(MockOp::Update, entity, default)
    }

    async fn upload(&self, bucket: &str, path: &str, _file: &MultipartUpload) -> ApiResult<Value> {
        let mut state = self.lock();
        *state.calls.entry(MockOp::Upload).or_insert(0) += 1;
        let default = json!({ "Key": format!("{}/{}", bucket, path) });
        if state.uploads.len() > 1 {
            state.uploads.pop_front().unwrap_or(Ok(default))
        } else {
            state.uploads.front().cloned().unwrap_or(Ok(default))
        }
    }
}

// ============================================================================
// CLASSIFIED FAILURES
// ============================================================================

pub mod errors {
    use super::*;

    /// Row-level security refusal with the Postgres policy code.
    pub fn access_denied() -> ApiError {
        ApiError::new(
            ErrorKind::Forbidden,
            "new row violates row-level security policy",
        )
        .with_status(403)
        .with_code("42501")
        .with_access(AccessDenial::PolicyCode)
    }

    pub fn server_error() -> ApiError {
        ApiError::from_kind(ErrorKind::ServerError).with_status(500)
    }

    pub fn network() -> ApiError {
        ApiError::network("connection refused")
    }

    pub fn timeout() -> ApiError {
        ApiError::timeout("POST rest/v1/associations")
    }

    pub fn validation(message: &str) -> ApiError {
        ApiError::validation(message).with_status(422)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    pub fn association_row(id: &str, name: &str) -> Value {
        json!({ "id": id, "name": name, "registration_number": "27-123-456" })
    }

    pub fn employee_row(id: &str, association_id: &str) -> Value {
        json!({
            "id": id,
            "association_id": association_id,
            "first_name": "Jana",
            "last_name": "Novakova",
        })
    }

    pub fn payroll_row(id: &str, employee_id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "employee_id": employee_id,
            "period": "2024-05",
            "status": status,
            "gross_amount": 42000.0,
        })
    }

    /// Retry without waiting between attempts.
    pub fn instant_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    /// Context over `remote` and an in-memory store with instant retries.
    pub fn memory_context(remote: &MockDataService) -> Arc<DataContext> {
        context_builder(remote).build().into()
    }

    /// Builder preset like [`memory_context`], for tests that tweak it.
    pub fn context_builder(remote: &MockDataService) -> DataContextBuilder {
        DataContext::builder()
            .remote(Arc::new(remote.clone()))
            .store(Arc::new(MemoryStore::new()))
            .retry(instant_retry())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        prop::sample::select(EntityType::ALL.to_vec())
    }

    /// Remote-style identities, never carrying the local prefix.
    pub fn arb_remote_id() -> impl Strategy<Value = String> {
        "[0-9]{1,6}"
    }

    pub fn arb_association() -> impl Strategy<Value = Association> {
        (arb_remote_id(), "[A-Z][a-z]{2,12}( [A-Z][a-z]{2,8})?").prop_map(|(id, name)| {
            Association {
                id,
                name: format!("SVJ {}", name),
                registration_number: None,
                address: None,
                created_at: None,
                extra: Map::new(),
            }
        })
    }

    /// UI status labels, known and unknown, in mixed case.
    pub fn arb_ui_status() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(
                ledgerline_core::UI_STATUS_TABLE
                    .iter()
                    .map(|(label, _)| label.to_string())
                    .collect::<Vec<_>>()
            ),
            "[A-Za-z _-]{0,16}",
        ]
    }

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        prop::sample::select(vec![
            ErrorKind::Timeout,
            ErrorKind::Network,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Validation,
            ErrorKind::RateLimit,
            ErrorKind::ServerError,
            ErrorKind::BackendUnavailable,
            ErrorKind::Unknown,
        ])
    }
}
