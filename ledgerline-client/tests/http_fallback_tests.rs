//! Repository flows over the real REST data service.
//!
//! A WireMock server plays the backend; the context, transport and local
//! store are the ones the CLI builds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerline_client::{
    DataContext, ErrorClassifier, HttpDataService, LoginRedirect, RetryPolicy, SessionStore,
    Transport, TransportSettings,
};
use ledgerline_core::{is_local_id, Association, ErrorKind};
use ledgerline_storage::{KeyValueStore, MemoryStore};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct CountingRedirect {
    count: AtomicU32,
}

impl LoginRedirect for CountingRedirect {
    fn redirect_to_login(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn http_context(
    server: &MockServer,
    classifier: ErrorClassifier,
    fallback_enabled: bool,
) -> (Arc<DataContext>, Arc<CountingRedirect>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let redirect = Arc::new(CountingRedirect::default());
    let mut settings = TransportSettings::new(server.uri());
    settings.request_timeout = Duration::from_secs(5);
    settings.classifier = classifier;
    let transport = Transport::new(settings, SessionStore::new(Arc::clone(&store)), redirect.clone())
        .expect("transport should build");
    let ctx = DataContext::builder()
        .remote(Arc::new(HttpDataService::new(transport)))
        .store(store)
        .retry(RetryPolicy::new(3, Duration::ZERO))
        .fallback_enabled(fallback_enabled)
        .build();
    (Arc::new(ctx), redirect)
}

async fn deny_associations(server: &MockServer, expected_posts: u64) {
    let denied = ResponseTemplate::new(403)
        .set_body_json(json!({"message": "permission denied for table associations"}));
    Mock::given(method("POST"))
        .and(path("/rest/v1/associations"))
        .respond_with(denied.clone())
        .expect(expected_posts)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/associations"))
        .respond_with(denied)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_denied_create_is_kept_locally_and_listed() {
    let server = MockServer::start().await;
    deny_associations(&server, 1).await;
    let (ctx, redirect) = http_context(&server, ErrorClassifier::default(), true);
    let repo = ctx.repository::<Association>().unwrap();

    let created = repo.create(&json!({ "name": "SVJ Letna" })).await.unwrap();

    assert!(is_local_id(&created.id));
    assert_eq!(created.name, "SVJ Letna");
    assert!(created.created_at.is_some());

    let listed = repo.list().await.unwrap();
    assert_eq!(listed, vec![created]);
    assert_eq!(redirect.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_denied_create_with_fallback_disabled_is_backend_unavailable() {
    let server = MockServer::start().await;
    deny_associations(&server, 1).await;
    let (ctx, _redirect) = http_context(&server, ErrorClassifier::default(), false);
    let repo = ctx.repository::<Association>().unwrap();

    let err = repo.create(&json!({ "name": "SVJ Letna" })).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::BackendUnavailable);
    assert!(repo.local_store().is_empty());
    assert_eq!(repo.list().await.unwrap_err().kind, ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn test_expired_session_on_create_is_not_written_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/associations"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"code": "PGRST301", "message": "JWT expired"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    // Listing the code as a policy code must not turn a 401 into a denial.
    let (ctx, redirect) = http_context(&server, ErrorClassifier::new(["PGRST301"]), true);
    ctx.session().set_token("expired").unwrap();
    let repo = ctx.repository::<Association>().unwrap();

    let err = repo.create(&json!({ "name": "SVJ Letna" })).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.code, "PGRST301");
    assert!(!err.triggers_fallback());
    assert!(repo.local_store().is_empty());
    assert_eq!(ctx.session().token(), None);
    assert_eq!(redirect.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_numeric_remote_ids_are_listed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/associations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": 17, "name": "SVJ Zizkov"}])),
        )
        .mount(&server)
        .await;
    let (ctx, _redirect) = http_context(&server, ErrorClassifier::default(), true);
    let repo = ctx.repository::<Association>().unwrap();

    let listed = repo.list().await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "17");
    assert_eq!(listed[0].name, "SVJ Zizkov");
}
