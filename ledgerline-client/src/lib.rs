//! Ledgerline Client - Resilient Data Access
//!
//! Remote calls go through [`Transport`] (timeout, bearer auth,
//! classification) wrapped in a [`RetryPolicy`]. [`Repository`] layers the
//! TTL cache and the local fallback store on top so reads and creates keep
//! working when the backend is slow, unreachable, or refuses the caller.

pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod repository;
pub mod retry;
pub mod service;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use classify::{ErrorClassifier, RawFailure, DEFAULT_POLICY_CODES};
pub use config::{ClientConfig, ConfigError};
pub use context::{DataContext, DataContextBuilder};
pub use error::ClientError;
pub use repository::{DataSource, Fetched, Repository};
pub use retry::{with_retry, RetryPolicy};
pub use service::{HttpDataService, RemoteDataService};
pub use session::{LogRedirect, LoginRedirect, SessionStore, AUTH_TOKEN_KEY};
pub use transport::{
    MultipartUpload, RequestBody, RequestOptions, ResponseBody, Transport, TransportResponse,
    TransportSettings,
};
