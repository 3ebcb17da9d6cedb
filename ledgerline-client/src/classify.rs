//! Translation of raw transport failures into classified [`ApiError`]s.
//!
//! The classifier is the only place that inspects response bodies. It also
//! decides whether a failure is an access denial, which is what later routes
//! an operation to the local fallback store.

use ledgerline_core::{AccessDenial, ApiError, ErrorKind};
use serde_json::{Map, Value};

/// Body fields searched for a human-readable message, in priority order.
const MESSAGE_FIELDS: [&str; 6] = ["message", "error_description", "error", "msg", "hint", "details"];

/// Backend codes that always mean "the caller's role may not do this".
///
/// `42501` is PostgreSQL's insufficient_privilege. The gateway's JWT codes
/// (`PGRST301` and friends) are session failures and arrive as 401.
pub const DEFAULT_POLICY_CODES: [&str; 1] = ["42501"];

/// Access-control vocabulary recognised in 403 messages.
const ACCESS_VOCABULARY: [&str; 7] = [
    "permission",
    "not authorized",
    "unauthorized",
    "policy",
    "row-level security",
    "access denied",
    "insufficient privilege",
];

/// A failure as observed by the transport, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    /// The server answered with a non-success status.
    Status {
        status: u16,
        status_text: String,
        body: String,
    },
    /// The request exceeded the transport timeout.
    Timeout { operation: String },
    /// No HTTP response was obtained.
    Network { message: String },
    /// A success response whose body could not be decoded.
    Malformed { message: String },
}

/// Deterministic mapping from [`RawFailure`] to [`ApiError`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    policy_codes: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl ErrorClassifier {
    /// Build a classifier recognising the default policy codes plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy_codes: Vec<String> =
            DEFAULT_POLICY_CODES.iter().map(|c| c.to_string()).collect();
        for code in extra {
            let code = code.into();
            if !policy_codes.contains(&code) {
                policy_codes.push(code);
            }
        }
        Self { policy_codes }
    }

    pub fn policy_codes(&self) -> &[String] {
        &self.policy_codes
    }

    pub fn classify(&self, failure: &RawFailure) -> ApiError {
        match failure {
            RawFailure::Timeout { operation } => ApiError::timeout(operation),
            RawFailure::Network { message } => ApiError::network(message.clone()),
            RawFailure::Malformed { message } => {
                ApiError::unknown(message.clone()).with_code("MALFORMED_RESPONSE")
            }
            RawFailure::Status {
                status,
                status_text,
                body,
            } => self.classify_status(*status, status_text, body),
        }
    }

    fn classify_status(&self, status: u16, status_text: &str, body: &str) -> ApiError {
        let kind = ErrorKind::from_status(status);
        let parsed = serde_json::from_str::<Value>(body).ok();
        let object = parsed.as_ref().and_then(Value::as_object);

        let message = object
            .and_then(extract_message)
            .or_else(|| non_empty(status_text))
            .unwrap_or_else(|| kind.default_message().to_string());
        let code = object.and_then(extract_code);

        let mut error = ApiError::new(kind, message)
            .with_status(status)
            .with_code(code.clone().unwrap_or_else(|| kind.code().to_string()));
        if let Some(access) = self.access_denial(kind, code.as_deref(), &error.message) {
            error = error.with_access(access);
        }
        if let Some(details) = parsed {
            error = error.with_details(details);
        }
        error
    }

    fn access_denial(&self, kind: ErrorKind, code: Option<&str>, message: &str) -> Option<AccessDenial> {
        // An expired or invalid session must end in a re-login, never a local write.
        if kind == ErrorKind::Unauthorized {
            return None;
        }
        if code.is_some_and(|c| self.policy_codes.iter().any(|p| p == c)) {
            return Some(AccessDenial::PolicyCode);
        }
        if kind == ErrorKind::Forbidden && mentions_access_control(message) {
            return Some(AccessDenial::Vocabulary);
        }
        None
    }
}

/// Whether `message` reads like an access-control rejection.
pub fn mentions_access_control(message: &str) -> bool {
    let lowered = message.to_lowercase();
    ACCESS_VOCABULARY.iter().any(|term| lowered.contains(term))
}

fn extract_message(body: &Map<String, Value>) -> Option<String> {
    MESSAGE_FIELDS
        .iter()
        .filter_map(|field| body.get(*field))
        .find_map(|value| match value {
            Value::String(s) => non_empty(s),
            _ => None,
        })
}

fn extract_code(body: &Map<String, Value>) -> Option<String> {
    match body.get("code")? {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status(status: u16, body: &str) -> RawFailure {
        RawFailure::Status {
            status,
            status_text: "Status Text".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_status_mapping() {
        let classifier = ErrorClassifier::default();
        let cases = [
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (422, ErrorKind::Validation),
            (429, ErrorKind::RateLimit),
            (502, ErrorKind::ServerError),
            (418, ErrorKind::Unknown),
        ];
        for (code, kind) in cases {
            let err = classifier.classify(&status(code, ""));
            assert_eq!(err.kind, kind, "status {}", code);
            assert_eq!(err.http_status, Some(code));
            assert_eq!(err.code, kind.code());
            assert_eq!(err.message, "Status Text");
        }
    }

    #[test]
    fn test_timeout_and_network() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify(&RawFailure::Timeout {
            operation: "GET /rest/v1/employees".to_string(),
        });
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.http_status.is_none());

        let err = classifier.classify(&RawFailure::Network {
            message: "connection refused".to_string(),
        });
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(!err.triggers_fallback());
    }

    #[test]
    fn test_message_field_priority() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify(&status(
            422,
            r#"{"hint": "h", "error": "e", "message": ""}"#,
        ));
        assert_eq!(err.message, "e");
        assert!(err.details.is_some());

        let err = classifier.classify(&status(422, r#"{"details": "only details"}"#));
        assert_eq!(err.message, "only details");

        let err = classifier.classify(&status(500, "<html>bad gateway</html>"));
        assert_eq!(err.message, "Status Text");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_body_code_wins_over_kind_code() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify(&status(409, r#"{"code": "23505", "message": "duplicate key"}"#));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.code, "23505");
        assert!(!err.triggers_fallback());
    }

    #[test]
    fn test_policy_code_is_structured_access_denial() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify(&status(
            403,
            r#"{"code": "42501", "message": "new row violates row-level security policy"}"#,
        ));
        assert_eq!(err.kind, ErrorKind::Forbidden);
        assert_eq!(err.access, Some(AccessDenial::PolicyCode));
        assert!(err.triggers_fallback());
    }

    #[test]
    fn test_configured_policy_code() {
        let classifier = ErrorClassifier::new(["P0403"]);
        let err = classifier.classify(&status(400, r#"{"code": "P0403", "message": "tenant closed"}"#));
        assert_eq!(err.access, Some(AccessDenial::PolicyCode));
        assert_eq!(classifier.policy_codes().len(), 2);
    }

    #[test]
    fn test_vocabulary_only_on_forbidden() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify(&status(403, r#"{"message": "Permission denied for table employees"}"#));
        assert_eq!(err.access, Some(AccessDenial::Vocabulary));
        assert!(err.access.unwrap().is_heuristic());

        let err = classifier.classify(&status(500, r#"{"message": "permission check crashed"}"#));
        assert!(err.access.is_none());

        let err = classifier.classify(&status(403, r#"{"message": "quota exceeded"}"#));
        assert!(err.access.is_none());
    }

    #[test]
    fn test_unauthorized_never_routes_to_fallback() {
        let classifier = ErrorClassifier::new(["PGRST301"]);
        let err = classifier.classify(&status(401, r#"{"code": "PGRST301", "message": "JWT expired"}"#));
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.code, "PGRST301");
        assert!(!err.triggers_fallback());

        let err = classifier.classify(&status(401, r#"{"code": "42501", "message": "permission denied"}"#));
        assert!(err.access.is_none());
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(code in 100u16..600, body in ".{0,40}") {
            let classifier = ErrorClassifier::default();
            let failure = status(code, &body);
            prop_assert_eq!(classifier.classify(&failure), classifier.classify(&failure));
        }
    }
}
