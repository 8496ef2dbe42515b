//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] over an in-memory database and
//! a temporary storage root, serves the router on a random port and talks to
//! it with `reqwest`. Processing capabilities are in-process stubs.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediagate::config::{Config, TokenConfig};
use mediagate::conversion::{
    Capabilities, CapabilityError, JobDescription, ProcessingCapability, ProcessingOutcome,
    Submission, SuccessReport,
};
use mediagate::delivery::{Authorizer, OwnerPolicy};
use mediagate::server::{create_router, AppContext, Services};
use mediagate_common::ProcessingMetrics;
use mediagate_db::pool::{init_memory_pool, DbPool};
use serde_json::Value;
use tempfile::TempDir;

/// Local capability that "transcodes" instantly.
#[derive(Default)]
pub struct InstantLocal {
    pub jobs: Mutex<Vec<JobDescription>>,
}

#[async_trait]
impl ProcessingCapability for InstantLocal {
    fn name(&self) -> &str {
        "instant-local"
    }

    async fn submit(&self, job: &JobDescription) -> Result<Submission, CapabilityError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(Submission::Completed(ProcessingOutcome::Success(SuccessReport {
            route: Some(job.route),
            processed_path: format!("processed/{}/out.webp", job.item_id),
            thumbnail_path: None,
            quality_variants: Default::default(),
            metrics: Some(ProcessingMetrics::from_sizes(
                job.original_size_bytes,
                job.original_size_bytes / 2,
                5,
            )),
        })))
    }
}

/// Remote capability that accepts every job; outcomes arrive by webhook.
#[derive(Default)]
pub struct AcceptingRemote {
    pub jobs: Mutex<Vec<JobDescription>>,
}

#[async_trait]
impl ProcessingCapability for AcceptingRemote {
    fn name(&self) -> &str {
        "accepting-remote"
    }

    async fn submit(&self, job: &JobDescription) -> Result<Submission, CapabilityError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(Submission::Accepted)
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub local: Arc<InstantLocal>,
    pub remote: Arc<AcceptingRemote>,
    storage: TempDir,
    token: Option<String>,
}

pub struct HarnessOptions {
    pub config: Config,
    pub authorizer: Arc<dyn Authorizer>,
    pub storage_backend: Option<Arc<dyn mediagate::delivery::StorageBackend>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let mut config = Config::default();
        config.storage.signing_secret = "test-signing-secret".to_string();
        Self {
            config,
            authorizer: Arc::new(OwnerPolicy),
            storage_backend: None,
        }
    }
}

impl HarnessOptions {
    /// Enable bearer authentication with the given `(token, user)` pairs.
    pub fn with_tokens(mut self, tokens: &[(&str, &str)]) -> Self {
        self.config.server.auth.enabled = true;
        self.config.server.auth.tokens = tokens
            .iter()
            .map(|(token, user)| TokenConfig {
                token: token.to_string(),
                user_id: user.to_string(),
            })
            .collect();
        self
    }
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let storage = tempfile::tempdir().expect("failed to create storage dir");
        let mut config = options.config;
        config.storage.root = storage.path().to_path_buf();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        config.storage.public_base_url = format!("http://{addr}");

        let local = Arc::new(InstantLocal::default());
        let remote = Arc::new(AcceptingRemote::default());
        let services = Services {
            authorizer: options.authorizer,
            storage_backend: options.storage_backend,
            capabilities: Capabilities {
                local: Some(local.clone() as Arc<dyn ProcessingCapability>),
                remote: Some(remote.clone() as Arc<dyn ProcessingCapability>),
            },
        };

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let ctx = AppContext::new(config, db.clone(), services);
        let app = create_router(ctx.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            ctx,
            db,
            addr,
            client: reqwest::Client::new(),
            local,
            remote,
            storage,
            token: None,
        }
    }

    /// Send requests as the caller owning `token`.
    pub fn as_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.get(self.url(path)))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.post(self.url(path)))
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.delete(self.url(path)))
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        self.storage.path().to_path_buf()
    }

    /// Write an object into storage at `path`.
    pub fn put_object(&self, path: &str, bytes: &[u8]) {
        let file = self.storage.path().join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, bytes).unwrap();
    }

    /// Submit an intake batch and return the parsed response.
    pub async fn intake(&self, files: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .post("/api/media/intake")
            .json(&serde_json::json!({ "files": files }))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    pub async fn item(&self, id: &str) -> Value {
        let resp = self.get(&format!("/api/media/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 200, "item {id} should be readable");
        resp.json().await.unwrap()
    }

    /// Poll an item until it reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: &str) -> Value {
        for _ in 0..100 {
            let item = self.item(id).await;
            if item["processingStatus"] == status {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("item {id} never reached {status}");
    }
}

/// Intake entry for an image.
pub fn image_file(name: &str, storage_path: &str, size: u64, mime: &str) -> Value {
    serde_json::json!({
        "fileName": name,
        "sizeBytes": size,
        "mimeType": mime,
        "kind": "image",
        "storagePath": storage_path,
    })
}

/// Intake entry for a video.
pub fn video_file(name: &str, storage_path: &str, size: u64, width: u32, height: u32) -> Value {
    serde_json::json!({
        "fileName": name,
        "sizeBytes": size,
        "mimeType": "video/mp4",
        "width": width,
        "height": height,
        "kind": "video",
        "storagePath": storage_path,
    })
}
