use crate::config::Config;
use crate::conversion::{
    Capabilities, CommandProcessor, PlannerCapabilities, ProcessingCapability, ProcessingQueue,
    ProcessingTracker, RemoteProcessor,
};
use crate::delivery::{
    authorizer_from_config, Authorizer, DeliveryGateway, SigningStorage, StorageBackend,
};
use crate::events::EventBus;
use crate::thumbnails::ThumbnailCache;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use mediagate_common::CallerId;
use mediagate_db::pool::DbPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod routes_delivery;
pub mod routes_media;
pub mod routes_objects;
pub mod routes_sse;
pub mod routes_webhook;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db_pool: DbPool,
    pub tracker: Arc<ProcessingTracker>,
    pub queue: ProcessingQueue,
    /// What the planner may route to in this deployment
    pub planner: PlannerCapabilities,
    pub gateway: Arc<DeliveryGateway>,
    /// Built-in storage; resolves intake paths and serves `/objects`
    pub storage: Arc<SigningStorage>,
    pub thumbnails: Arc<ThumbnailCache>,
    /// Bearer token to caller identity
    pub tokens: Arc<HashMap<String, CallerId>>,
}

/// External collaborators wired into the context.
pub struct Services {
    pub authorizer: Arc<dyn Authorizer>,
    /// Signs delivery URLs; the built-in [`SigningStorage`] when `None`
    pub storage_backend: Option<Arc<dyn StorageBackend>>,
    pub capabilities: Capabilities,
}

impl Services {
    /// Build the collaborators named in config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let authorizer = authorizer_from_config(&config.delivery.authorization)?;

        let local = if config.processing.local_transcode {
            CommandProcessor::locate(&config.processing.tool, config.storage.root.clone())
                .map(|p| Arc::new(p) as Arc<dyn ProcessingCapability>)
        } else {
            None
        };

        let remote = match config.processing.remote.url {
            Some(ref url) => {
                let processor = RemoteProcessor::new(
                    url.clone(),
                    config.processing.remote.api_key.clone(),
                    config.storage.public_base_url.clone(),
                )
                .context("Failed to create remote processing client")?;
                Some(Arc::new(processor) as Arc<dyn ProcessingCapability>)
            }
            None => None,
        };

        Ok(Self {
            authorizer,
            storage_backend: None,
            capabilities: Capabilities { local, remote },
        })
    }
}

impl AppContext {
    /// Assemble the context and start the processing queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, db_pool: DbPool, services: Services) -> Self {
        let timeout = Duration::from_secs(config.processing.timeout_secs);
        let tracker = Arc::new(ProcessingTracker::new(
            db_pool.clone(),
            EventBus::new(),
            timeout,
        ));

        let planner = PlannerCapabilities {
            local_transcode: config.processing.local_transcode
                && services.capabilities.local.is_some(),
            remote_configured: services.capabilities.remote.is_some(),
        };

        let queue = ProcessingQueue::new(
            tracker.clone(),
            services.capabilities,
            config.processing.workers,
            timeout,
        );

        let storage = Arc::new(SigningStorage::from_config(&config.storage));
        let backend = services
            .storage_backend
            .unwrap_or_else(|| storage.clone() as Arc<dyn StorageBackend>);
        let gateway = Arc::new(DeliveryGateway::from_config(
            &config,
            services.authorizer,
            backend,
        ));

        Self {
            tokens: Arc::new(auth::token_map(&config.server.auth)),
            config: Arc::new(config),
            db_pool,
            tracker,
            queue,
            planner,
            gateway,
            storage,
            thumbnails: Arc::new(ThumbnailCache::new()),
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .nest("/webhook", routes_webhook::webhook_routes())
        .layer(cors)
        // Delivery answers its own preflight and sets its own CORS headers
        .merge(routes_delivery::delivery_routes())
        .merge(routes_objects::object_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    routes_media::media_routes().merge(routes_sse::sse_routes())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
