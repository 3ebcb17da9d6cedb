//! Session token storage and the login redirect hook.

use std::sync::Arc;

use ledgerline_storage::{KeyValueStore, StorageError};

/// Storage key holding the bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Invoked once when the backend reports the session as unauthorized.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

/// Redirect hook for headless use: logs where the user should sign in.
#[derive(Debug, Clone, Default)]
pub struct LogRedirect {
    login_url: Option<String>,
}

impl LogRedirect {
    pub fn new(login_url: Option<String>) -> Self {
        Self { login_url }
    }
}

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!(
            login_url = self.login_url.as_deref().unwrap_or("<not configured>"),
            "Session expired; sign in again"
        );
    }
}

/// Bearer token persisted in the client-local key-value store.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current token; unreadable or blank storage means "no session".
    pub fn token(&self) -> Option<String> {
        let raw = match self.store.read(AUTH_TOKEN_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session token");
                return None;
            }
        };
        let token = serde_json::from_str::<String>(&raw).unwrap_or(raw);
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    pub fn set_token(&self, token: &str) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(token)?;
        self.store.write(AUTH_TOKEN_KEY, &encoded)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(AUTH_TOKEN_KEY)
    }
}
