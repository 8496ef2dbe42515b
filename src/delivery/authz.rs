//! Access decisions for stored objects.

use std::time::Duration;

use async_trait::async_trait;
use mediagate_common::CallerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::storage::StoragePath;
use crate::config::{AuthorizationConfig, AuthorizationMode};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix readable by every authenticated caller.
pub const PUBLIC_PREFIX: &str = "public";

/// Outcome of an access decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Validity the grant was decided for.
    #[serde(default)]
    pub expires_in_seconds: u64,
}

impl AccessGrant {
    pub fn allow(expires_in_seconds: u64) -> Self {
        Self {
            granted: true,
            reason: None,
            expires_in_seconds,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
            expires_in_seconds: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authorization service error: {0}")]
    Service(String),
}

/// Decides whether a caller may read an object.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        path: &StoragePath,
        caller: &CallerId,
        validity_secs: u64,
    ) -> Result<AccessGrant, AuthzError>;
}

/// Grants access to the caller's own prefix and to `public/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerPolicy;

#[async_trait]
impl Authorizer for OwnerPolicy {
    async fn authorize(
        &self,
        path: &StoragePath,
        caller: &CallerId,
        validity_secs: u64,
    ) -> Result<AccessGrant, AuthzError> {
        let prefix = path.top_level();
        if prefix == caller.as_str() || prefix == PUBLIC_PREFIX {
            Ok(AccessGrant::allow(validity_secs))
        } else {
            Ok(AccessGrant::deny("Caller does not own this object"))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionRequest<'a> {
    storage_path: &'a str,
    caller_id: &'a str,
    requested_validity_seconds: u64,
}

#[derive(Deserialize)]
struct DecisionResponse {
    granted: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Delegates decisions to an external policy service.
pub struct HttpAuthorizer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpAuthorizer {
    pub fn new(url: String, api_key: Option<String>) -> Result<Self, AuthzError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthzError::Service(e.to_string()))?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(
        &self,
        path: &StoragePath,
        caller: &CallerId,
        validity_secs: u64,
    ) -> Result<AccessGrant, AuthzError> {
        let body = DecisionRequest {
            storage_path: path.as_str(),
            caller_id: caller.as_str(),
            requested_validity_seconds: validity_secs,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthzError::Service(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthzError::Service(format!(
                "decision service returned {}",
                response.status()
            )));
        }

        let decision: DecisionResponse = response
            .json()
            .await
            .map_err(|e| AuthzError::Service(e.to_string()))?;

        debug!(path = %path, caller = %caller, granted = decision.granted, "Access decision");

        Ok(if decision.granted {
            AccessGrant::allow(validity_secs)
        } else {
            AccessGrant {
                granted: false,
                reason: decision.reason,
                expires_in_seconds: 0,
            }
        })
    }
}

/// Build the authorizer selected in config.
pub fn authorizer_from_config(
    config: &AuthorizationConfig,
) -> anyhow::Result<std::sync::Arc<dyn Authorizer>> {
    match config.mode {
        AuthorizationMode::Owner => Ok(std::sync::Arc::new(OwnerPolicy)),
        AuthorizationMode::Http => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("delivery.authorization.url is required in http mode"))?;
            Ok(std::sync::Arc::new(HttpAuthorizer::new(url, config.api_key.clone())?))
        }
    }
}
