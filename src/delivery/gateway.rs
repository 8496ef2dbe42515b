//! Signed-URL issuance for stored objects.
//!
//! Every request runs the same sequence: cheap input validation, one access
//! decision, then one signing call. Nothing is cached between requests.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use mediagate_common::CallerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use super::authz::Authorizer;
use super::storage::{StorageBackend, StoragePath};
use super::transform::TransformOptions;
use crate::config::Config;

/// Query parameters of a delivery request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryRequest {
    pub path: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub quality: Option<String>,
}

/// Successful delivery response body.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryUrl {
    pub success: bool,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Missing path parameter")]
    MissingPath,

    #[error("Invalid path parameter")]
    InvalidPath,

    #[error("{0}")]
    InvalidTransform(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    AccessDenied(String),

    #[error("Internal server error")]
    Internal,
}

impl DeliveryError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingPath | Self::InvalidPath | Self::InvalidTransform(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (
            status,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
            body,
        )
            .into_response()
    }
}

/// Issues short-lived links after an access decision.
pub struct DeliveryGateway {
    authorizer: Arc<dyn Authorizer>,
    storage: Arc<dyn StorageBackend>,
    url_ttl: Duration,
    cache_max_age: Duration,
    default_quality: u8,
}

impl DeliveryGateway {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        storage: Arc<dyn StorageBackend>,
        url_ttl: Duration,
        cache_max_age: Duration,
    ) -> Self {
        Self {
            authorizer,
            storage,
            url_ttl,
            cache_max_age,
            default_quality: TransformOptions::DEFAULT_QUALITY,
        }
    }

    pub fn from_config(
        config: &Config,
        authorizer: Arc<dyn Authorizer>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self::new(
            authorizer,
            storage,
            Duration::from_secs(config.storage.url_ttl_secs),
            Duration::from_secs(config.delivery.cache_max_age_secs),
        )
        .with_default_quality(config.delivery.default_quality)
    }

    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = quality;
        self
    }

    /// `Cache-Control` value for successful responses.
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age.as_secs())
    }

    /// Authorize `caller` for the requested object and mint a signed URL.
    pub async fn issue(
        &self,
        request: &DeliveryRequest,
        caller: &CallerId,
    ) -> Result<DeliveryUrl, DeliveryError> {
        let raw = request
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(DeliveryError::MissingPath)?;
        let path = StoragePath::parse(raw).map_err(|e| {
            debug!(path = raw, error = %e, "Rejected delivery path");
            DeliveryError::InvalidPath
        })?;
        let transform = TransformOptions::from_query(
            request.width.as_deref(),
            request.height.as_deref(),
            request.quality.as_deref(),
            self.default_quality,
        )
        .map_err(|e| DeliveryError::InvalidTransform(e.to_string()))?;

        let grant = self
            .authorizer
            .authorize(&path, caller, self.url_ttl.as_secs())
            .await
            .map_err(|e| {
                error!(path = %path, caller = %caller, error = %e, "Access decision failed");
                DeliveryError::Internal
            })?;

        if !grant.granted {
            debug!(path = %path, caller = %caller, "Delivery denied");
            return Err(DeliveryError::AccessDenied(
                grant.reason.unwrap_or_else(|| "Access denied".to_string()),
            ));
        }

        let signed = self
            .storage
            .create_signed_url(&path, self.url_ttl, transform.as_ref())
            .await
            .map_err(|e| {
                error!(path = %path, error = %e, "Failed to create signed URL");
                DeliveryError::Internal
            })?;

        Ok(DeliveryUrl {
            success: true,
            url: signed.url,
            expires_at: signed.expires_at,
        })
    }
}
