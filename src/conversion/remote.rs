//! Delegation to the remote processing service.
//!
//! Jobs are POSTed to the configured endpoint together with the URL the
//! service must call back with the outcome. The submission itself completes
//! as soon as the service accepts the job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::capability::{CapabilityError, JobDescription, ProcessingCapability, Submission};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteJobRequest<'a> {
    #[serde(flatten)]
    job: &'a JobDescription,
    callback_url: String,
}

/// Client for the remote processing service.
pub struct RemoteProcessor {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    callback_base_url: String,
}

impl RemoteProcessor {
    /// Create a client submitting to `url`.
    ///
    /// `callback_base_url` is the externally reachable base URL of this
    /// service; outcomes are posted to `/webhook/processing/{item_id}` under it.
    pub fn new(
        url: String,
        api_key: Option<String>,
        callback_base_url: String,
    ) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url,
            api_key,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn callback_url(&self, job: &JobDescription) -> String {
        format!("{}/webhook/processing/{}", self.callback_base_url, job.item_id)
    }
}

#[async_trait]
impl ProcessingCapability for RemoteProcessor {
    fn name(&self) -> &str {
        "remote"
    }

    async fn submit(&self, job: &JobDescription) -> Result<Submission, CapabilityError> {
        let body = RemoteJobRequest {
            job,
            callback_url: self.callback_url(job),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(item_id = %job.item_id, %status, "Remote processing service rejected job");
            return Err(CapabilityError::Failed(format!(
                "remote service returned {}: {}",
                status,
                detail.trim()
            )));
        }

        debug!(item_id = %job.item_id, plan_id = %job.plan_id, "Remote job accepted");
        Ok(Submission::Accepted)
    }
}
