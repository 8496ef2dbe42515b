//! Delivery gateway integration tests over HTTP.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{HarnessOptions, TestHarness};
use mediagate::delivery::{
    AccessGrant, Authorizer, AuthzError, SignedUrl, StorageBackend, StorageError, StoragePath,
    TransformOptions,
};
use mediagate_common::CallerId;
use serde_json::Value;

/// Grants everything except paths under `private/`, counting calls.
#[derive(Default)]
struct CountingAuthorizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Authorizer for CountingAuthorizer {
    async fn authorize(
        &self,
        path: &StoragePath,
        _caller: &CallerId,
        validity_secs: u64,
    ) -> Result<AccessGrant, AuthzError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.top_level() == "private" {
            Ok(AccessGrant::deny("Object is private"))
        } else {
            Ok(AccessGrant::allow(validity_secs))
        }
    }
}

struct BrokenStorage;

#[async_trait]
impl StorageBackend for BrokenStorage {
    async fn create_signed_url(
        &self,
        _path: &StoragePath,
        _validity: Duration,
        _transform: Option<&TransformOptions>,
    ) -> Result<SignedUrl, StorageError> {
        Err(StorageError::Signing(
            "connection refused: storage-internal-7.local".into(),
        ))
    }
}

async fn harness_with_counter() -> (TestHarness, Arc<CountingAuthorizer>) {
    let authz = Arc::new(CountingAuthorizer::default());
    let harness = TestHarness::with_options(HarnessOptions {
        authorizer: authz.clone(),
        ..Default::default()
    })
    .await;
    (harness, authz)
}

#[tokio::test]
async fn missing_path_is_rejected_before_authorization() {
    let (harness, authz) = harness_with_counter().await;

    let resp = harness.get("/api/delivery").send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Missing path parameter");
    assert_eq!(authz.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn denied_path_is_forbidden_with_reason() {
    let (harness, authz) = harness_with_counter().await;
    harness.put_object("private/secret.jpg", b"jpeg");

    let resp = harness
        .get("/api/delivery?path=private/secret.jpg")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Object is private");
    assert_eq!(authz.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn granted_request_returns_signed_url_with_short_cache() {
    let harness = TestHarness::new().await;
    harness.put_object("anonymous/photo.jpg", b"jpeg");

    let before = Utc::now();
    let resp = harness
        .get("/api/delivery?path=anonymous/photo.jpg&width=320")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["cache-control"].to_str().unwrap(),
        "public, max-age=300"
    );
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    let url = body["url"].as_str().unwrap();
    assert!(url.contains("/objects/anonymous/photo.jpg?expires="));
    assert!(url.contains("width=320"));
    assert!(url.contains("quality=75"));
    assert!(url.contains("resize=cover"));
    assert!(url.contains("format=webp"));

    let expires_at: DateTime<Utc> = body["expires_at"].as_str().unwrap().parse().unwrap();
    let ttl = expires_at - before;
    assert!(ttl > chrono::Duration::seconds(3590) && ttl <= chrono::Duration::seconds(3601));
}

#[tokio::test]
async fn preflight_allows_any_origin() {
    let harness = TestHarness::new().await;

    let resp = harness
        .client
        .request(reqwest::Method::OPTIONS, harness.url("/api/delivery"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let headers = resp.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(
        headers["access-control-allow-headers"],
        "authorization, x-client-info, apikey, content-type"
    );
    assert_eq!(headers["access-control-allow-methods"], "GET, OPTIONS");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_requests_are_each_authorized() {
    let (harness, authz) = harness_with_counter().await;
    harness.put_object("anonymous/photo.jpg", b"jpeg");

    let first = harness.get("/api/delivery?path=anonymous/photo.jpg").send();
    let second = harness.get("/api/delivery?path=anonymous/photo.jpg").send();
    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
    assert_eq!(authz.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn storage_failure_is_a_generic_500() {
    let harness = TestHarness::with_options(HarnessOptions {
        storage_backend: Some(Arc::new(BrokenStorage)),
        ..Default::default()
    })
    .await;

    let resp = harness
        .get("/api/delivery?path=anonymous/photo.jpg")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("storage-internal"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["error"], "Internal server error");
}

#[tokio::test]
async fn unauthenticated_delivery_is_rejected() {
    let harness =
        TestHarness::with_options(HarnessOptions::default().with_tokens(&[("t-alice", "alice")]))
            .await;

    let resp = harness
        .get("/api/delivery?path=alice/photo.jpg")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = harness.get("/api/delivery").send().await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn owner_policy_scopes_callers_to_their_prefix() {
    let harness =
        TestHarness::with_options(HarnessOptions::default().with_tokens(&[("t-alice", "alice")]))
            .await
            .as_token("t-alice");
    harness.put_object("alice/a.jpg", b"a");
    harness.put_object("bob/b.jpg", b"b");
    harness.put_object("public/logo.png", b"logo");

    let own = harness.get("/api/delivery?path=alice/a.jpg").send().await.unwrap();
    assert_eq!(own.status(), 200);
    let public = harness
        .get("/api/delivery?path=public/logo.png")
        .send()
        .await
        .unwrap();
    assert_eq!(public.status(), 200);
    let other = harness.get("/api/delivery?path=bob/b.jpg").send().await.unwrap();
    assert_eq!(other.status(), 403);
}

#[tokio::test]
async fn signed_url_serves_the_object_until_tampered() {
    let harness = TestHarness::new().await;
    harness.put_object("anonymous/photo.jpg", b"jpeg bytes");

    let body: Value = harness
        .get("/api/delivery?path=anonymous/photo.jpg&width=100&height=80&quality=60")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = body["url"].as_str().unwrap().to_string();

    let resp = harness.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"jpeg bytes");

    let tampered = url.replace("width=100", "width=2000");
    let resp = harness.client.get(&tampered).send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let other_object = url.replace("photo.jpg", "other.jpg");
    let resp = harness.client.get(&other_object).send().await.unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn invalid_path_is_a_bad_request() {
    let (harness, authz) = harness_with_counter().await;

    let resp = harness
        .get("/api/delivery?path=../etc/passwd")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(authz.calls.load(Ordering::SeqCst), 0);
}
