//! Error taxonomy for Ledgerline data access.
//!
//! Every failure that crosses the data-access boundary is an [`ApiError`]
//! carrying a closed [`ErrorKind`]. Retry, fallback and user messaging are
//! driven by the kind (and the structured [`AccessDenial`] marker), never by
//! raw message text.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR KIND ENUM
// ============================================================================

/// Closed classification of data-access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The request did not complete within the transport timeout
    Timeout,

    /// Connectivity failure not tied to an HTTP response
    Network,

    /// Session missing or expired (HTTP 401)
    Unauthorized,

    /// Authenticated but not permitted (HTTP 403)
    Forbidden,

    /// Resource does not exist (HTTP 404)
    NotFound,

    /// Payload rejected by the backend (HTTP 422)
    Validation,

    /// Too many requests (HTTP 429)
    RateLimit,

    /// Backend failure (HTTP 5xx)
    ServerError,

    /// Local fallback is disabled but would have been used
    BackendUnavailable,

    /// Anything not covered above
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
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
    ];

    /// Map an HTTP status code onto a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            422 => ErrorKind::Validation,
            429 => ErrorKind::RateLimit,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Machine-readable code, identical to the serialized form.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether a retry policy may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Unauthorized
                | ErrorKind::Forbidden
                | ErrorKind::NotFound
                | ErrorKind::Validation
                | ErrorKind::BackendUnavailable
        )
    }

    /// Get a default message for this kind.
    pub fn default_message(&self) -> &'static str {
        self.localized_message(Locale::En)
    }

    /// Generic, user-presentable message for this kind.
    pub fn localized_message(&self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => match self {
                ErrorKind::Timeout => "The server took too long to respond. Please try again.",
                ErrorKind::Network => "Cannot reach the server. Check your connection.",
                ErrorKind::Unauthorized => "Your session has expired. Please sign in again.",
                ErrorKind::Forbidden => "You do not have permission to perform this action.",
                ErrorKind::NotFound => "The requested record was not found.",
                ErrorKind::Validation => "The submitted data is not valid.",
                ErrorKind::RateLimit => "Too many requests. Please wait a moment.",
                ErrorKind::ServerError => "The server encountered an error. Please try again later.",
                ErrorKind::BackendUnavailable => "The data service is currently unavailable.",
                ErrorKind::Unknown => "An unexpected error occurred.",
            },
            Locale::Cs => match self {
                ErrorKind::Timeout => "Server neodpověděl včas. Zkuste to prosím znovu.",
                ErrorKind::Network => "Server není dostupný. Zkontrolujte připojení.",
                ErrorKind::Unauthorized => "Vaše přihlášení vypršelo. Přihlaste se prosím znovu.",
                ErrorKind::Forbidden => "K této akci nemáte oprávnění.",
                ErrorKind::NotFound => "Požadovaný záznam nebyl nalezen.",
                ErrorKind::Validation => "Odeslaná data nejsou platná.",
                ErrorKind::RateLimit => "Příliš mnoho požadavků. Chvíli počkejte.",
                ErrorKind::ServerError => "Na serveru došlo k chybě. Zkuste to později.",
                ErrorKind::BackendUnavailable => "Datová služba je momentálně nedostupná.",
                ErrorKind::Unknown => "Došlo k neočekávané chybě.",
            },
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Language for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Cs,
}

// ============================================================================
// ACCESS DENIAL MARKER
// ============================================================================

/// Why a failure counts as "caller rejected or backend absent".
///
/// Attached by the classifier; the presence of this marker is what routes an
/// operation to the local fallback store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDenial {
    /// The backend returned a structured access-policy code.
    PolicyCode,
    /// A 403 whose message uses access-control vocabulary (heuristic).
    Vocabulary,
    /// No remote service is configured.
    NotConfigured,
}

impl AccessDenial {
    /// Whether the marker came from message scanning rather than a code.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, AccessDenial::Vocabulary)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Classified data-access failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    /// Closed classification driving all policy
    pub kind: ErrorKind,

    /// Machine-readable code (backend code when provided, else the kind code)
    pub code: String,

    /// HTTP status when the failure came from a response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    /// Human-readable message
    pub message: String,

    /// Set when the failure should route to the local fallback store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessDenial>,

    /// Raw structured body, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Result alias used across the data-access layer.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            http_status: None,
            message: message.into(),
            access: None,
            details: None,
        }
    }

    /// Create a new error using the kind's default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_access(mut self, access: AccessDenial) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Request '{}' timed out", operation),
        )
    }

    /// Create a Network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Create a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a BackendUnavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    /// Error used when no remote data service is configured at all.
    pub fn not_configured() -> Self {
        Self::new(
            ErrorKind::BackendUnavailable,
            "No remote data service is configured",
        )
        .with_code("NOT_CONFIGURED")
        .with_access(AccessDenial::NotConfigured)
    }

    /// Create an Unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    // ========================================================================
    // Policy queries
    // ========================================================================

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether the failure should be served from the local fallback store.
    pub fn triggers_fallback(&self) -> bool {
        self.access.is_some()
    }

    /// Message suitable for direct display.
    ///
    /// Validation failures show the backend's message verbatim; every other
    /// kind shows the generic localized message.
    pub fn user_message(&self, locale: Locale) -> String {
        match self.kind {
            ErrorKind::Validation if !self.message.trim().is_empty() => self.message.clone(),
            kind => kind.localized_message(locale).to_string(),
        }
    }

    /// The `(kind, message)` pair handed to the UI boundary.
    pub fn to_display(&self, locale: Locale) -> DisplayError {
        DisplayError {
            kind: self.kind,
            message: self.user_message(locale),
        }
    }
}

/// Structured error as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayError {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Unauthorized);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::Forbidden);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(422), ErrorKind::Validation);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(599), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::Unknown);
        assert_eq!(ErrorKind::from_status(409), ErrorKind::Unknown);
    }

    #[test]
    fn test_retryable_set() {
        let terminal: Vec<_> = ErrorKind::ALL
            .iter()
            .filter(|k| !k.is_retryable())
            .copied()
            .collect();
        assert_eq!(
            terminal,
            vec![
                ErrorKind::Unauthorized,
                ErrorKind::Forbidden,
                ErrorKind::NotFound,
                ErrorKind::Validation,
                ErrorKind::BackendUnavailable,
            ]
        );
    }

    #[test]
    fn test_kind_serializes_as_code() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = ApiError::validation("IČO musí mít 8 číslic");
        assert_eq!(err.user_message(Locale::En), "IČO musí mít 8 číslic");
        assert_eq!(err.user_message(Locale::Cs), "IČO musí mít 8 číslic");
    }

    #[test]
    fn test_other_kinds_use_generic_message() {
        let err = ApiError::new(ErrorKind::ServerError, "pq: relation \"x\" does not exist");
        let display = err.to_display(Locale::En);
        assert_eq!(display.kind, ErrorKind::ServerError);
        assert_eq!(display.message, ErrorKind::ServerError.default_message());
        assert!(!display.message.contains("pq:"));
    }

    #[test]
    fn test_not_configured_triggers_fallback() {
        let err = ApiError::not_configured();
        assert_eq!(err.kind, ErrorKind::BackendUnavailable);
        assert!(err.triggers_fallback());
        assert!(!err.is_retryable());
        assert_eq!(err.code, "NOT_CONFIGURED");
    }

    #[test]
    fn test_plain_forbidden_does_not_trigger_fallback() {
        let err = ApiError::new(ErrorKind::Forbidden, "nope").with_status(403);
        assert!(!err.triggers_fallback());
    }
}
